//! SWORD v2 wire documents.
//!
//! Two documents matter to the pipeline: the deposit receipt returned by a
//! collection POST (it carries the statement URL that becomes the
//! deposit's status reference) and the Atom statement fetched from that
//! URL while polling (its categories carry the archive-side state terms).
//! Both are parsed leniently: unknown elements are skipped, only the
//! links and categories the pipeline consumes are extracted.

use quick_xml::{events::Event, Reader};
use thiserror::Error;

/// Link relation naming the statement document in a deposit receipt.
pub const STATEMENT_REL: &str = "http://purl.org/net/sword/terms/statement";
/// Default category scheme whose terms carry the archive state.
pub const STATE_SCHEME: &str = "http://purl.org/net/sword/terms/state";

/// Failures parsing a SWORD document.
#[derive(Debug, Error)]
pub enum SwordError {
    #[error("malformed sword document")]
    Xml(#[from] quick_xml::Error),

    #[error("malformed attribute in sword document")]
    Attribute(#[from] quick_xml::events::attributes::AttrError),

    /// The deposit receipt carries no statement link at all.
    #[error("deposit receipt has no statement link")]
    MissingStatement,
}

/// The parts of a deposit receipt the pipeline consumes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepositReceipt {
    statement: String,
    alternate: Option<String>,
}

impl DepositReceipt {
    /// URL of the Atom statement document to poll.
    pub fn statement(&self) -> &str {
        &self.statement
    }

    /// The receipt's `alternate` link, typically the item's landing
    /// page, recorded as an external id on the repository copy.
    pub fn alternate(&self) -> Option<&str> {
        self.alternate.as_deref()
    }
}

#[derive(Debug, Default)]
struct Link {
    rel: Option<String>,
    href: Option<String>,
    media_type: Option<String>,
}

/// Parses a deposit receipt, extracting the statement URL.
///
/// Receipts may carry several statement links (Atom feed and OAI-ORE
/// flavors); the Atom one wins, otherwise the first in document order.
pub fn parse_receipt(xml: &[u8]) -> Result<DepositReceipt, SwordError> {
    let mut statements: Vec<Link> = Vec::new();
    let mut alternate = None;

    scan_elements(xml, |name, attributes| {
        if name != b"link" {
            return Ok(());
        }
        let mut link = Link::default();
        for (key, value) in attributes {
            match key.as_slice() {
                b"rel" => link.rel = Some(value),
                b"href" => link.href = Some(value),
                b"type" => link.media_type = Some(value),
                _ => {}
            }
        }
        match link.rel.as_deref() {
            Some(STATEMENT_REL) => statements.push(link),
            Some("alternate") => {
                if alternate.is_none() {
                    alternate = link.href;
                }
            }
            _ => {}
        }
        Ok(())
    })?;

    let statement = statements
        .iter()
        .find(|l| {
            l.media_type
                .as_deref()
                .is_some_and(|t| t.contains("atom"))
        })
        .or_else(|| statements.first())
        .and_then(|l| l.href.clone())
        .ok_or(SwordError::MissingStatement)?;

    Ok(DepositReceipt {
        statement,
        alternate,
    })
}

/// The parts of an Atom statement the pipeline consumes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    terms: Vec<String>,
    alternate: Option<String>,
}

impl Statement {
    /// State terms from categories matching the scheme, in document
    /// order.
    pub fn terms(&self) -> &[String] {
        &self.terms
    }

    /// The feed's `alternate` link: the archived item's URL, used as the
    /// repository copy's external id.
    pub fn alternate(&self) -> Option<&str> {
        self.alternate.as_deref()
    }
}

/// Parses an Atom statement: the `term` of every `category` whose
/// `scheme` equals `scheme` (in document order), plus the first
/// `alternate` link.
pub fn parse_statement(xml: &[u8], scheme: &str) -> Result<Statement, SwordError> {
    let mut terms = Vec::new();
    let mut alternate = None;

    scan_elements(xml, |name, attributes| {
        match name {
            b"category" => {
                let mut term = None;
                let mut category_scheme = None;
                for (key, value) in attributes {
                    match key.as_slice() {
                        b"term" => term = Some(value),
                        b"scheme" => category_scheme = Some(value),
                        _ => {}
                    }
                }
                if category_scheme.as_deref() == Some(scheme) {
                    if let Some(term) = term {
                        terms.push(term);
                    }
                }
            }
            b"link" => {
                let mut rel = None;
                let mut href = None;
                for (key, value) in attributes {
                    match key.as_slice() {
                        b"rel" => rel = Some(value),
                        b"href" => href = Some(value),
                        _ => {}
                    }
                }
                if rel.as_deref() == Some("alternate") && alternate.is_none() {
                    alternate = href;
                }
            }
            _ => {}
        }
        Ok(())
    })?;

    Ok(Statement { terms, alternate })
}

/// Walks every start/empty element, handing the callback the local name
/// and the (local-name, unescaped-value) attribute pairs.
fn scan_elements<F>(xml: &[u8], mut visit: F) -> Result<(), SwordError>
where
    F: FnMut(&[u8], Vec<(Vec<u8>, String)>) -> Result<(), SwordError>,
{
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) | Event::Empty(e) => {
                let name = e.local_name().as_ref().to_owned();
                let mut attributes = Vec::new();
                for attr in e.attributes() {
                    let attr = attr?;
                    attributes.push((
                        attr.key.local_name().as_ref().to_owned(),
                        attr.unescape_value()?.into_owned(),
                    ));
                }
                visit(&name, attributes)?;
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const RECEIPT: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<entry xmlns="http://www.w3.org/2005/Atom"
       xmlns:sword="http://purl.org/net/sword/terms/">
  <title>Deposit s42</title>
  <link rel="alternate" href="https://dspace.example.org/item/77"/>
  <link rel="edit" href="https://dspace.example.org/swordv2/edit/77"/>
  <link rel="http://purl.org/net/sword/terms/statement"
        type="application/rdf+xml"
        href="https://dspace.example.org/swordv2/statement/77.rdf"/>
  <link rel="http://purl.org/net/sword/terms/statement"
        type="application/atom+xml;type=feed"
        href="https://dspace.example.org/swordv2/statement/77.atom"/>
  <sword:treatment>Deposited</sword:treatment>
</entry>"#;

    const STATEMENT: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>Statement for item 77</title>
  <link rel="alternate" href="https://dspace.example.org/item/77"/>
  <category scheme="http://purl.org/net/sword/terms/state"
            term="archived"
            label="Archived">The item has been archived.</category>
  <category scheme="http://example.org/other-scheme" term="ignored"/>
  <entry>
    <title>Part</title>
    <category scheme="http://purl.org/net/sword/terms/state" term="reviewing"/>
  </entry>
</feed>"#;

    #[test]
    fn receipt_prefers_the_atom_statement_link() {
        let receipt = parse_receipt(RECEIPT.as_bytes()).unwrap();
        assert_eq!(
            receipt.statement(),
            "https://dspace.example.org/swordv2/statement/77.atom"
        );
        assert_eq!(
            receipt.alternate(),
            Some("https://dspace.example.org/item/77")
        );
    }

    #[test]
    fn receipt_falls_back_to_the_first_statement_link() {
        let xml = r#"<entry xmlns="http://www.w3.org/2005/Atom">
            <link rel="http://purl.org/net/sword/terms/statement"
                  href="https://a.example.org/statement"/>
        </entry>"#;
        let receipt = parse_receipt(xml.as_bytes()).unwrap();
        assert_eq!(receipt.statement(), "https://a.example.org/statement");
        assert_eq!(receipt.alternate(), None);
    }

    #[test]
    fn receipt_without_statement_is_rejected() {
        let xml = r#"<entry xmlns="http://www.w3.org/2005/Atom">
            <link rel="alternate" href="https://a.example.org/item"/>
        </entry>"#;
        let err = parse_receipt(xml.as_bytes()).unwrap_err();
        assert!(matches!(err, SwordError::MissingStatement));
    }

    #[test]
    fn statement_terms_filter_on_scheme_in_document_order() {
        let statement = parse_statement(STATEMENT.as_bytes(), STATE_SCHEME).unwrap();
        assert_eq!(statement.terms(), ["archived", "reviewing"]);
        assert_eq!(
            statement.alternate(),
            Some("https://dspace.example.org/item/77")
        );
    }

    #[test]
    fn statement_with_no_matching_scheme_yields_nothing() {
        let statement =
            parse_statement(STATEMENT.as_bytes(), "http://nope.example.org/").unwrap();
        assert!(statement.terms().is_empty());
    }

    #[test]
    fn garbage_is_a_parse_error() {
        let err = parse_statement(b"<feed><unclosed", STATE_SCHEME);
        assert!(err.is_err());
    }
}
