use std::fmt::Display;

pub use crate::model::ErrorData;

impl Display for ErrorData {
    /// Render a wire error as `message (jsonrpc error CODE)`, with the
    /// structured data appended when present.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (jsonrpc error {})", self.message, self.code.0)?;
        if let Some(data) = &self.data {
            write!(f, ": {data}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ErrorData {}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::model::{ErrorCode, ErrorData};

    #[test]
    fn test_wire_error_display() {
        let error = ErrorData::method_not_found("method not found: frobnicate/run");
        assert_eq!(
            error.to_string(),
            "method not found: frobnicate/run (jsonrpc error -32601)"
        );
    }

    #[test]
    fn test_wire_error_display_appends_data() {
        let error = ErrorData::new(
            ErrorCode::RESOURCE_NOT_FOUND,
            "resource not found: file:///nope.txt",
            Some(json!({"uri": "file:///nope.txt"})),
        );
        assert_eq!(
            error.to_string(),
            "resource not found: file:///nope.txt (jsonrpc error -32002): {\"uri\":\"file:///nope.txt\"}"
        );
    }

    #[test]
    fn test_wire_error_boxes_as_std_error() {
        let boxed: Box<dyn std::error::Error> =
            Box::new(ErrorData::parse_error("undecodable frame", None));
        assert!(boxed.to_string().contains("-32700"));
    }
}
