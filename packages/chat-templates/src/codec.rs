//! JSON interchange codec.
//!
//! Both directions work on bytes: the adapter copies foreign results into a
//! `Vec<u8>` before anything here looks at them, and encoded requests are
//! handed to [`HostBuffer`](crate::buffer::HostBuffer) as bytes.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Error, Operation, Result};

/// Serialize a request into its wire form.
pub fn encode<T: Serialize>(operation: Operation, value: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| Error::encoding(operation, &e))
}

/// Parse a foreign result.
///
/// The bytes are validated as UTF-8 before parsing so that an encoding
/// problem is reported as such rather than as a syntax error.
pub fn decode<T: DeserializeOwned>(operation: Operation, bytes: &[u8]) -> Result<T> {
    let text = std::str::from_utf8(bytes).map_err(|e| Error::Decoding {
        operation,
        len: bytes.len(),
        message: format!("invalid UTF-8 at byte {}", e.valid_up_to()),
    })?;
    serde_json::from_str(text).map_err(|e| Error::decoding(operation, bytes.len(), &e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ChatMessage, FetchTemplateResponse, RenderRequest, RenderResponse};
    use crate::value::Value;

    #[test]
    fn encode_render_request() {
        let request = RenderRequest {
            add_generation_prompt: true,
            ..RenderRequest::new(vec![ChatMessage::user("hi")])
        };
        let bytes = encode(Operation::RenderChatTemplate, &request).unwrap();
        assert_eq!(
            std::str::from_utf8(&bytes).unwrap(),
            r#"{"messages":[{"role":"user","content":"hi"}],"add_generation_prompt":true}"#
        );
    }

    #[test]
    fn encode_escapes_nul() {
        let request = RenderRequest::new(vec![ChatMessage::user("a\0b")]);
        let bytes = encode(Operation::RenderChatTemplate, &request).unwrap();
        assert!(!bytes.contains(&0));
    }

    #[test]
    fn encode_rejects_non_finite_kwarg() {
        let mut request = RenderRequest::new(vec![ChatMessage::user("hi")]);
        request
            .chat_template_kwargs
            .insert("temperature".to_string(), Value::Float(f64::NAN));

        let err = encode(Operation::RenderChatTemplate, &request).unwrap_err();
        match err {
            Error::Encoding { operation, message } => {
                assert_eq!(operation, Operation::RenderChatTemplate);
                assert!(message.contains("non-finite float"));
            }
            other => panic!("expected encoding error, got {:?}", other),
        }
    }

    #[test]
    fn decode_render_response() {
        let response: RenderResponse = decode(
            Operation::RenderChatTemplate,
            br#"{"rendered_chats":["HI"],"generation_indices":[]}"#,
        )
        .unwrap();
        assert_eq!(response.rendered_chats, vec!["HI".to_string()]);
        assert!(response.generation_indices.is_empty());
    }

    #[test]
    fn decode_rejects_invalid_utf8() {
        let bytes = b"{\"chat_template\":\"\xff\xfe\"}";
        let err = decode::<FetchTemplateResponse>(Operation::FetchChatTemplate, bytes).unwrap_err();
        match err {
            Error::Decoding { len, message, .. } => {
                assert_eq!(len, bytes.len());
                assert!(message.contains("UTF-8"));
            }
            other => panic!("expected decoding error, got {:?}", other),
        }
    }

    #[test]
    fn decode_rejects_wrong_shape() {
        let err = decode::<RenderResponse>(
            Operation::RenderChatTemplate,
            br#"{"rendered_chats":"not a list"}"#,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            Error::Decoding {
                operation: Operation::RenderChatTemplate,
                ..
            }
        ));
        assert!(!err.to_string().contains("not a list"));
    }

    #[test]
    fn decode_rejects_truncated() {
        let err = decode::<RenderResponse>(Operation::RenderChatTemplate, br#"{"rendered_"#)
            .unwrap_err();
        assert!(err.to_string().contains("11 bytes"));
    }
}
