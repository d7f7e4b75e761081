use quick_xml::NsReader as Reader;
use quick_xml::events::Event;

use crate::error::StoreError;

/// Check that `xml`'s root element declares `namespace` and whitespace-lists
/// `schema` in its `xsi:schemaLocation` attribute. Does not validate against
/// the schema itself (out of scope); only the two declarations the store
/// invariant depends on.
pub fn validate(xml: &str, namespace: &str, schema: &str) -> Result<(), StoreError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    loop {
        match reader
            .read_event()
            .map_err(|e| StoreError::XmlInvalid(e.to_string()))?
        {
            Event::Start(tag) | Event::Empty(tag) => {
                let root_namespace = root_namespace(&tag, &reader)
                    .ok_or_else(|| StoreError::XmlInvalid("wrong xml namespace".to_string()))?;
                if root_namespace != namespace {
                    return Err(StoreError::XmlInvalid("wrong xml namespace".to_string()));
                }

                let schema_location = schema_location(&tag, &reader)
                    .ok_or_else(|| StoreError::XmlInvalid("no schema location".to_string()))?;
                if !schema_location.split_whitespace().any(|token| token == schema) {
                    return Err(StoreError::XmlInvalid("wrong schema location".to_string()));
                }
                return Ok(());
            }
            Event::Eof => {
                return Err(StoreError::XmlInvalid("empty document".to_string()));
            }
            _ => continue,
        }
    }
}

fn root_namespace(tag: &quick_xml::events::BytesStart, reader: &Reader<&[u8]>) -> Option<String> {
    let name = tag.name();
    let (prefix, _) = reader.resolver().resolve_element(name);
    match prefix {
        quick_xml::name::ResolveResult::Bound(ns) => {
            Some(String::from_utf8_lossy(ns.as_ref()).into_owned())
        }
        _ => default_namespace(tag),
    }
}

fn default_namespace(tag: &quick_xml::events::BytesStart) -> Option<String> {
    tag.attributes().flatten().find_map(|attr| {
        if attr.key.as_ref() == b"xmlns" {
            Some(String::from_utf8_lossy(attr.value.as_ref()).into_owned())
        } else {
            None
        }
    })
}

fn schema_location(tag: &quick_xml::events::BytesStart, _reader: &Reader<&[u8]>) -> Option<String> {
    tag.attributes().flatten().find_map(|attr| {
        let key = attr.key.as_ref();
        if key.ends_with(b"schemaLocation") {
            Some(String::from_utf8_lossy(attr.value.as_ref()).into_owned())
        } else {
            None
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const NS: &str = "http://www.openarchives.org/OAI/2.0/oai_dc/";
    const SCHEMA: &str = "http://www.openarchives.org/OAI/2.0/oai_dc.xsd";

    const VALID: &str = r#"<oai_dc:dc xmlns:oai_dc="http://www.openarchives.org/OAI/2.0/oai_dc/"
           xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance"
           xsi:schemaLocation="http://www.openarchives.org/OAI/2.0/oai_dc/ http://www.openarchives.org/OAI/2.0/oai_dc.xsd">
        <dc:title>Example</dc:title>
    </oai_dc:dc>"#;

    #[test]
    fn accepts_matching_namespace_and_schema() {
        validate(VALID, NS, SCHEMA).unwrap();
    }

    #[test]
    fn rejects_wrong_namespace() {
        let err = validate(VALID, "http://example.org/other", SCHEMA).unwrap_err();
        assert!(matches!(err, StoreError::XmlInvalid(_)));
    }

    #[test]
    fn rejects_missing_schema_location() {
        let xml = r#"<oai_dc:dc xmlns:oai_dc="http://www.openarchives.org/OAI/2.0/oai_dc/"><dc:title>x</dc:title></oai_dc:dc>"#;
        let err = validate(xml, NS, SCHEMA).unwrap_err();
        assert!(matches!(err, StoreError::XmlInvalid(_)));
    }

    #[test]
    fn rejects_schema_not_listed() {
        let xml = r#"<oai_dc:dc xmlns:oai_dc="http://www.openarchives.org/OAI/2.0/oai_dc/"
               xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance"
               xsi:schemaLocation="http://example.org/other.xsd"><dc:title>x</dc:title></oai_dc:dc>"#;
        let err = validate(xml, NS, SCHEMA).unwrap_err();
        assert!(matches!(err, StoreError::XmlInvalid(_)));
    }
}
