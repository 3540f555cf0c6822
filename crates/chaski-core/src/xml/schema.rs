//! Built-in structural schema of Chaski requests

use super::{Element, XmlError};
use chrono::NaiveDate;

/// Content model of a leaf element
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Leaf {
    Text,
    Boolean,
    Date,
}

/// Content model of one element
#[derive(Debug, Clone, Copy)]
enum Content {
    Leaf(Leaf),
    /// Ordered child sequence: name, min occurs, max occurs (`None` = unbounded)
    Sequence(&'static [(&'static str, usize, Option<usize>)]),
}

#[derive(Debug, Clone, Copy)]
struct Rule {
    name: &'static str,
    attrs: &'static [&'static str],
    content: Content,
}

const RULES: &[Rule] = &[
    Rule {
        name: "Mail",
        attrs: &[],
        content: Content::Sequence(&[("Credentials", 0, Some(1)), ("Message", 1, None)]),
    },
    Rule {
        name: "Fetch",
        attrs: &[],
        content: Content::Sequence(&[
            ("Credentials", 1, Some(1)),
            ("To", 0, None),
            ("Conditions", 0, Some(1)),
        ]),
    },
    Rule {
        name: "Credentials",
        attrs: &[],
        content: Content::Sequence(&[("Username", 1, Some(1)), ("Password", 1, Some(1))]),
    },
    Rule {
        name: "Message",
        attrs: &[],
        content: Content::Sequence(&[
            ("From", 1, Some(1)),
            ("To", 0, None),
            ("SecretTo", 0, None),
            ("Subject", 1, Some(1)),
            ("Chapter", 0, None),
        ]),
    },
    Rule {
        name: "Chapter",
        attrs: &[],
        content: Content::Sequence(&[
            ("ChapterName", 1, Some(1)),
            ("MIMEType", 1, Some(1)),
            ("ChapterContent", 1, Some(1)),
        ]),
    },
    Rule {
        name: "Conditions",
        attrs: &[],
        content: Content::Sequence(&[
            ("OnlyHeader", 0, Some(1)),
            ("MinReceiveDate", 0, Some(1)),
            ("MaxReceiveDate", 0, Some(1)),
            ("RemoveAfterFetch", 0, Some(1)),
        ]),
    },
    Rule {
        name: "ChapterContent",
        attrs: &["encoding"],
        content: Content::Leaf(Leaf::Text),
    },
    Rule {
        name: "OnlyHeader",
        attrs: &[],
        content: Content::Leaf(Leaf::Boolean),
    },
    Rule {
        name: "RemoveAfterFetch",
        attrs: &[],
        content: Content::Leaf(Leaf::Boolean),
    },
    Rule {
        name: "MinReceiveDate",
        attrs: &[],
        content: Content::Leaf(Leaf::Date),
    },
    Rule {
        name: "MaxReceiveDate",
        attrs: &[],
        content: Content::Leaf(Leaf::Date),
    },
];

const ROOTS: &[&str] = &["Mail", "Fetch"];

/// Elements with no rule of their own are plain text leaves without attributes
const TEXT_LEAF: Rule = Rule {
    name: "",
    attrs: &[],
    content: Content::Leaf(Leaf::Text),
};

/// Structural validator for incoming requests
#[derive(Debug, Clone, Copy, Default)]
pub struct Schema;

impl Schema {
    pub fn builtin() -> Self {
        Schema
    }

    pub fn validate(&self, root: &Element) -> Result<(), XmlError> {
        if !ROOTS.contains(&root.name.as_str()) {
            return Err(XmlError::Schema(format!(
                "Unexpected root element {}",
                root.name
            )));
        }
        validate_element(root)
    }
}

fn rule_for(name: &str) -> Rule {
    RULES
        .iter()
        .find(|r| r.name == name)
        .copied()
        .unwrap_or(TEXT_LEAF)
}

fn validate_element(element: &Element) -> Result<(), XmlError> {
    let rule = rule_for(&element.name);

    if let Some((key, _)) = element.attrs.iter().find(|(k, _)| !rule.attrs.contains(&k.as_str())) {
        return Err(XmlError::Schema(format!(
            "Attribute {} is not allowed on {}",
            key, element.name
        )));
    }

    match rule.content {
        Content::Leaf(leaf) => validate_leaf(element, leaf),
        Content::Sequence(sequence) => {
            if !element.text.trim().is_empty() {
                return Err(XmlError::Schema(format!(
                    "{} must not contain text",
                    element.name
                )));
            }
            validate_sequence(element, sequence)?;
            element.children.iter().try_for_each(validate_element)
        }
    }
}

fn validate_leaf(element: &Element, leaf: Leaf) -> Result<(), XmlError> {
    if let Some(child) = element.children.first() {
        return Err(XmlError::Schema(format!(
            "Unexpected element {} in {}",
            child.name, element.name
        )));
    }

    let text = element.text.trim();
    let valid = match leaf {
        Leaf::Text => true,
        Leaf::Boolean => matches!(text, "true" | "false" | "1" | "0"),
        Leaf::Date => NaiveDate::parse_from_str(text, "%Y-%m-%d").is_ok(),
    };

    if valid {
        Ok(())
    } else {
        Err(XmlError::Schema(format!(
            "Invalid value {:?} for {}",
            text, element.name
        )))
    }
}

fn validate_sequence(
    element: &Element,
    sequence: &[(&'static str, usize, Option<usize>)],
) -> Result<(), XmlError> {
    let mut children = element.children.iter().peekable();

    for (name, min, max) in sequence {
        let mut count = 0;
        while children.next_if(|c| c.name == *name).is_some() {
            count += 1;
        }
        if count < *min {
            return Err(XmlError::Schema(format!(
                "{} requires at least {} {}",
                element.name, min, name
            )));
        }
        if let Some(max) = max {
            if count > *max {
                return Err(XmlError::Schema(format!(
                    "{} allows at most {} {}",
                    element.name, max, name
                )));
            }
        }
    }

    match children.next() {
        Some(extra) => Err(XmlError::Schema(format!(
            "Unexpected element {} in {}",
            extra.name, element.name
        ))),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xml::parse;

    fn check(xml: &str) -> Result<(), XmlError> {
        Schema::builtin().validate(&parse(xml.as_bytes()).unwrap())
    }

    #[test]
    fn test_valid_mail() {
        check(
            "<Mail><Credentials><Username>a</Username><Password>b</Password></Credentials>\
             <Message><From>a</From><To>b@x</To><SecretTo>c@y</SecretTo><Subject>hi</Subject>\
             <Chapter><ChapterName>n</ChapterName><MIMEType>text/plain</MIMEType>\
             <ChapterContent encoding='base64'>aGk=</ChapterContent></Chapter></Message></Mail>",
        )
        .unwrap();

        // Relayed mail carries no credentials
        check("<Mail><Message><From>a@x</From><Subject/></Message></Mail>").unwrap();
    }

    #[test]
    fn test_valid_fetch() {
        check(
            "<Fetch><Credentials><Username>a</Username><Password>b</Password></Credentials>\
             <To>a</To><To>b</To><Conditions><OnlyHeader>1</OnlyHeader>\
             <MinReceiveDate>2011-01-01</MinReceiveDate></Conditions></Fetch>",
        )
        .unwrap();
    }

    #[test]
    fn test_invalid_documents() {
        assert!(check("<Result><Status>Fail</Status></Result>").is_err());
        assert!(check("<Mail></Mail>").is_err());
        assert!(check("<Mail><Message><Subject/><From>a</From></Message></Mail>").is_err());
        assert!(check("<Mail><Message><From>a</From><Subject/><Extra/></Message></Mail>").is_err());
        assert!(check("<Mail><Message><From x='1'>a</From><Subject/></Message></Mail>").is_err());
        assert!(check("<Mail><Message><From><b/></From><Subject/></Message></Mail>").is_err());
        assert!(check("<Fetch><To>a</To></Fetch>").is_err());
    }

    #[test]
    fn test_invalid_leaf_values() {
        let fetch = |conds: &str| {
            check(&format!(
                "<Fetch><Credentials><Username>a</Username><Password>b</Password></Credentials>\
                 <Conditions>{}</Conditions></Fetch>",
                conds
            ))
        };
        assert!(fetch("<OnlyHeader>yes</OnlyHeader>").is_err());
        assert!(fetch("<MaxReceiveDate>01/02/2011</MaxReceiveDate>").is_err());
        assert!(fetch("<RemoveAfterFetch>false</RemoveAfterFetch>").is_ok());
    }
}
