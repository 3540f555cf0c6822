//! Chaski protocol model
//!
//! Typed views of the request and response documents, converted to and from
//! the generic [`Element`] tree. Text fields are trimmed on input, except
//! chapter content which is passed through untouched.

use crate::xml::Element;
use chaski_common::{Address, Error, Result};
use chrono::NaiveDate;

pub const STATUS_OK: &str = "Success";
pub const STATUS_FAIL: &str = "Fail";

/// Date format of `MinReceiveDate` / `MaxReceiveDate`
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Boolean literals read as true; anything else is false
const BOOL_TRUE: &[&str] = &["true", "1"];

fn required_text<'a>(element: &'a Element, name: &str) -> Result<&'a str> {
    element.child_text(name).ok_or_else(|| {
        Error::Protocol(format!("{} is missing in {}", name, element.name))
    })
}

fn parse_address(text: &str) -> Result<Address> {
    Address::parse(text).ok_or_else(|| Error::Protocol(format!("Invalid address: {:?}", text)))
}

/// Username and plaintext password
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn from_element(element: &Element) -> Result<Self> {
        Ok(Self {
            username: required_text(element, "Username")?.to_string(),
            password: required_text(element, "Password")?.to_string(),
        })
    }

    pub fn to_element(&self) -> Element {
        let mut element = Element::new("Credentials");
        element.push(Element::with_text("Username", &self.username));
        element.push(Element::with_text("Password", &self.password));
        element
    }
}

/// One named, typed body part
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chapter {
    pub name: String,
    pub mime_type: String,
    pub content: String,
    pub encoding: Option<String>,
}

impl Chapter {
    pub fn from_element(element: &Element) -> Result<Self> {
        let content = element
            .child("ChapterContent")
            .ok_or_else(|| Error::Protocol("ChapterContent is missing in Chapter".to_string()))?;

        Ok(Self {
            name: element.child_text("ChapterName").unwrap_or_default().to_string(),
            mime_type: element.child_text("MIMEType").unwrap_or_default().to_string(),
            content: content.text.clone(),
            encoding: content.attr("encoding").map(str::to_string),
        })
    }

    pub fn to_element(&self) -> Element {
        let mut content = Element::with_text("ChapterContent", &self.content);
        if let Some(encoding) = &self.encoding {
            content = content.with_attr("encoding", encoding);
        }

        let mut element = Element::new("Chapter");
        element.push(Element::with_text("ChapterName", &self.name));
        element.push(Element::with_text("MIMEType", &self.mime_type));
        element.push(content);
        element
    }
}

/// One message with its visible and blind recipients
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub from: Address,
    pub to: Vec<Address>,
    pub secret_to: Vec<Address>,
    pub subject: String,
    pub chapters: Vec<Chapter>,
}

impl Message {
    pub fn from_element(element: &Element) -> Result<Self> {
        let from = parse_address(required_text(element, "From")?)?;

        let to = element
            .children_named("To")
            .map(|e| parse_address(&e.text))
            .collect::<Result<Vec<_>>>()?;
        let secret_to = element
            .children_named("SecretTo")
            .map(|e| parse_address(&e.text))
            .collect::<Result<Vec<_>>>()?;
        let chapters = element
            .children_named("Chapter")
            .map(Chapter::from_element)
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            from,
            to,
            secret_to,
            subject: element.child_text("Subject").unwrap_or_default().to_string(),
            chapters,
        })
    }

    /// Serialize with SecretTo placed immediately before Subject
    pub fn to_element(&self) -> Element {
        let mut element = Element::new("Message");
        element.push(Element::with_text("From", self.from.to_string()));
        for to in &self.to {
            element.push(Element::with_text("To", to.to_string()));
        }
        for secret in &self.secret_to {
            element.push(Element::with_text("SecretTo", secret.to_string()));
        }
        element.push(Element::with_text("Subject", &self.subject));
        for chapter in &self.chapters {
            element.push(chapter.to_element());
        }
        element
    }

    /// Every recipient, visible ones first
    pub fn recipients(&self) -> impl Iterator<Item = &Address> {
        self.to.iter().chain(self.secret_to.iter())
    }
}

/// A submission: optional credentials plus ordered messages
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Mail {
    pub credentials: Option<Credentials>,
    pub messages: Vec<Message>,
}

impl Mail {
    pub fn from_element(element: &Element) -> Result<Self> {
        let credentials = element
            .child("Credentials")
            .map(Credentials::from_element)
            .transpose()?;
        let messages = element
            .children_named("Message")
            .map(Message::from_element)
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            credentials,
            messages,
        })
    }

    pub fn to_element(&self) -> Element {
        let mut element = Element::new("Mail");
        if let Some(credentials) = &self.credentials {
            element.push(credentials.to_element());
        }
        for message in &self.messages {
            element.push(message.to_element());
        }
        element
    }

    pub fn to_xml(&self) -> Vec<u8> {
        self.to_element().to_xml()
    }
}

/// Filters applied to a fetch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchConditions {
    pub only_headers: bool,
    pub min_date: Option<NaiveDate>,
    pub max_date: Option<NaiveDate>,
    pub remove_after: bool,
}

fn parse_bool(text: Option<&str>) -> bool {
    text.map(|t| BOOL_TRUE.contains(&t)).unwrap_or(false)
}

fn parse_date(element: &Element, name: &str) -> Result<Option<NaiveDate>> {
    match element.child_text(name) {
        None | Some("") => Ok(None),
        Some(text) => NaiveDate::parse_from_str(text, DATE_FORMAT)
            .map(Some)
            .map_err(|e| Error::Protocol(format!("Invalid {} {:?}: {}", name, text, e))),
    }
}

impl FetchConditions {
    pub fn from_element(element: &Element) -> Result<Self> {
        Ok(Self {
            only_headers: parse_bool(element.child_text("OnlyHeader")),
            min_date: parse_date(element, "MinReceiveDate")?,
            max_date: parse_date(element, "MaxReceiveDate")?,
            remove_after: parse_bool(element.child_text("RemoveAfterFetch")),
        })
    }

    pub fn to_element(&self) -> Element {
        let mut element = Element::new("Conditions");
        element.push(Element::with_text("OnlyHeader", self.only_headers.to_string()));
        if let Some(date) = self.min_date {
            element.push(Element::with_text("MinReceiveDate", date.format(DATE_FORMAT).to_string()));
        }
        if let Some(date) = self.max_date {
            element.push(Element::with_text("MaxReceiveDate", date.format(DATE_FORMAT).to_string()));
        }
        element.push(Element::with_text("RemoveAfterFetch", self.remove_after.to_string()));
        element
    }

    /// Whether a message received on `date` passes the inclusive date window
    pub fn accepts(&self, date: NaiveDate) -> bool {
        self.min_date.map_or(true, |min| min <= date) && self.max_date.map_or(true, |max| date <= max)
    }
}

/// Retrieval of stored messages for a set of accounts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub credentials: Credentials,
    pub accounts: Vec<String>,
    pub conditions: FetchConditions,
}

impl FetchRequest {
    pub fn from_element(element: &Element) -> Result<Self> {
        let credentials = element
            .child("Credentials")
            .ok_or_else(|| Error::Protocol("Credentials is missing in Fetch".to_string()))
            .and_then(Credentials::from_element)?;
        let accounts = element
            .children_named("To")
            .map(|e| e.text.trim().to_string())
            .collect();
        let conditions = element
            .child("Conditions")
            .map(FetchConditions::from_element)
            .transpose()?
            .unwrap_or_default();

        Ok(Self {
            credentials,
            accounts,
            conditions,
        })
    }

    pub fn to_element(&self) -> Element {
        let mut element = Element::new("Fetch");
        element.push(self.credentials.to_element());
        for account in &self.accounts {
            element.push(Element::with_text("To", account));
        }
        element.push(self.conditions.to_element());
        element
    }
}

/// Document flowing through the pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Mail(Mail),
    Fetch(FetchRequest),
}

impl Request {
    pub fn from_element(element: &Element) -> Result<Self> {
        match element.name.as_str() {
            "Mail" => {
                // Fetch replies may be empty envelopes, submitted mail may not
                let mail = Mail::from_element(element)?;
                if mail.messages.is_empty() {
                    return Err(Error::Protocol("Mail carries no Message".to_string()));
                }
                Ok(Request::Mail(mail))
            }
            "Fetch" => FetchRequest::from_element(element).map(Request::Fetch),
            other => Err(Error::Protocol(format!("Unexpected request {}", other))),
        }
    }

    pub fn to_element(&self) -> Element {
        match self {
            Request::Mail(mail) => mail.to_element(),
            Request::Fetch(fetch) => fetch.to_element(),
        }
    }

    pub fn to_xml(&self) -> Vec<u8> {
        self.to_element().to_xml()
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Request::Mail(_) => "Mail",
            Request::Fetch(_) => "Fetch",
        }
    }
}

/// `Result{Status, Description}` reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: String,
    pub description: String,
}

impl Response {
    pub fn success() -> Self {
        Self {
            status: STATUS_OK.to_string(),
            description: STATUS_OK.to_string(),
        }
    }

    pub fn fail(description: impl Into<String>) -> Self {
        Self {
            status: STATUS_FAIL.to_string(),
            description: description.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == STATUS_OK
    }

    pub fn from_element(element: &Element) -> Result<Self> {
        if element.name != "Result" {
            return Err(Error::Protocol(format!(
                "Expected Result, got {}",
                element.name
            )));
        }
        Ok(Self {
            status: required_text(element, "Status")?.to_string(),
            description: element.child_text("Description").unwrap_or_default().to_string(),
        })
    }

    pub fn to_element(&self) -> Element {
        let mut element = Element::new("Result");
        element.push(Element::with_text("Status", &self.status));
        element.push(Element::with_text("Description", &self.description));
        element
    }

    pub fn to_xml(&self) -> Vec<u8> {
        self.to_element().to_xml()
    }
}
