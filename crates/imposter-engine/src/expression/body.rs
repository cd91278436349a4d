//! JSONPath and XPath queries over request/response bodies.

use serde_json::Value;
use serde_json_path::JsonPath;

/// First node selected by a JSONPath expression.
pub fn json_path_query(value: &Value, path: &str) -> Option<Value> {
    let path = JsonPath::parse(path).ok()?;
    path.query(value).first().cloned()
}

/// Evaluate an XPath expression against an XML document, returning the
/// string value of the result (first node for node sets).
pub fn xpath_query(xml: &str, path: &str, namespaces: &[(String, String)]) -> Option<String> {
    use sxd_document::parser;
    use sxd_xpath::{Context, Factory, Value as XValue};

    let package = parser::parse(xml).ok()?;
    let document = package.as_document();

    let xpath = Factory::new().build(path).ok()??;
    let mut context = Context::new();
    for (prefix, uri) in namespaces {
        context.set_namespace(prefix, uri);
    }

    match xpath.evaluate(&context, document.root()).ok()? {
        XValue::String(s) => Some(s),
        XValue::Number(n) => {
            if n.fract() == 0.0 {
                Some(format!("{}", n as i64))
            } else {
                Some(n.to_string())
            }
        }
        XValue::Boolean(b) => Some(b.to_string()),
        XValue::Nodeset(nodes) => nodes.document_order_first().map(|node| node.string_value()),
    }
}

/// Render a JSON value the way it is written into stores and templates:
/// strings without quotes, everything else as JSON.
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_path_query() {
        let body = json!({"user": {"name": "Alice"}, "items": [{"id": 1}, {"id": 2}]});
        assert_eq!(json_path_query(&body, "$.user.name"), Some(json!("Alice")));
        assert_eq!(json_path_query(&body, "$.items[1].id"), Some(json!(2)));
        assert_eq!(json_path_query(&body, "$.items[*].id"), Some(json!(1)));
        assert_eq!(json_path_query(&body, "$.missing"), None);
        assert_eq!(json_path_query(&body, "not a path"), None);
    }

    #[test]
    fn test_xpath_query() {
        let xml = "<pets><pet id=\"7\"><name>Rex</name></pet></pets>";
        assert_eq!(
            xpath_query(xml, "/pets/pet/name", &[]),
            Some("Rex".to_string())
        );
        assert_eq!(xpath_query(xml, "/pets/pet/@id", &[]), Some("7".into()));
        assert_eq!(xpath_query(xml, "count(//pet)", &[]), Some("1".into()));
        assert_eq!(xpath_query(xml, "/pets/cat", &[]), None);
    }

    #[test]
    fn test_xpath_with_namespaces() {
        let xml = r#"<env:Envelope xmlns:env="http://example.com/env"><env:Body>hi</env:Body></env:Envelope>"#;
        let namespaces = vec![("e".to_string(), "http://example.com/env".to_string())];
        assert_eq!(
            xpath_query(xml, "/e:Envelope/e:Body", &namespaces),
            Some("hi".to_string())
        );
    }

    #[test]
    fn test_value_to_string() {
        assert_eq!(value_to_string(&json!("text")), "text");
        assert_eq!(value_to_string(&json!(42)), "42");
        assert_eq!(value_to_string(&json!({"a": 1})), r#"{"a":1}"#);
    }
}
