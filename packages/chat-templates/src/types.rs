//! Request and response types exchanged with the template module.
//!
//! Field names are the wire contract. Fields at their default value are left
//! out of the encoded JSON, and absent fields decode to the default, so
//! `decode(encode(x)) == x` holds for every value.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::codec;
use crate::error::{Operation, Result};
use crate::value::Value;

/// Keyword arguments passed through to the template at render time.
pub type Kwargs = BTreeMap<String, Value>;

fn is_false(b: &bool) -> bool {
    !*b
}

/// A single message in a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new("system", content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new("user", content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new("assistant", content)
    }
}

/// A request to render one conversation through a chat template.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RenderRequest {
    /// The conversation, in order.
    pub messages: Vec<ChatMessage>,

    /// Tool definitions made available to the template.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<Value>,

    /// Documents for retrieval-augmented templates.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub documents: Vec<Value>,

    /// Template text overriding the model's own template.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_template: Option<String>,

    #[serde(default, skip_serializing_if = "is_false")]
    pub return_assistant_tokens_mask: bool,

    #[serde(default, skip_serializing_if = "is_false")]
    pub continue_final_message: bool,

    #[serde(default, skip_serializing_if = "is_false")]
    pub add_generation_prompt: bool,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub chat_template_kwargs: Kwargs,
}

impl RenderRequest {
    /// Create a request for the given conversation with every option unset.
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            ..Self::default()
        }
    }

    /// Produce an independent copy by encoding and decoding the request.
    ///
    /// Besides copying, this proves the request survives the wire format:
    /// the copy compares equal to `self` exactly when nothing was lost.
    pub fn deep_copy(&self) -> Result<Self> {
        let bytes = codec::encode(Operation::RenderChatTemplate, self)?;
        codec::decode(Operation::RenderChatTemplate, &bytes)
    }
}

/// The rendered output for a [`RenderRequest`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderResponse {
    pub rendered_chats: Vec<String>,

    /// Per rendered chat, the `[start, end]` token ranges produced by the
    /// assistant. Only populated when the assistant token mask was requested.
    #[serde(default)]
    pub generation_indices: Vec<Vec<Vec<i64>>>,
}

/// An access token for a model registry.
///
/// Serializes as a plain string. `Debug` never shows the contents.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SecretToken(String);

impl SecretToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

impl fmt::Debug for SecretToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretToken(<redacted>)")
    }
}

impl From<String> for SecretToken {
    fn from(token: String) -> Self {
        Self(token)
    }
}

impl From<&str> for SecretToken {
    fn from(token: &str) -> Self {
        Self(token.to_string())
    }
}

/// A request to resolve the chat template for a model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FetchTemplateRequest {
    /// Registry name, or a filesystem path when `is_local_path` is set.
    pub model: String,

    /// Explicit template; the module resolves its kwargs without fetching.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_template: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<Value>,

    /// Registry revision (branch, tag or commit) to pin.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<SecretToken>,

    #[serde(default, skip_serializing_if = "is_false")]
    pub is_local_path: bool,
}

impl FetchTemplateRequest {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Self::default()
        }
    }
}

/// The resolved template for a [`FetchTemplateRequest`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FetchTemplateResponse {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub chat_template: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_template_kwargs: Option<Kwargs>,
}
