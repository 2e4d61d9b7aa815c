//! # Chat Templates
//!
//! A host-side bridge to a chat template module running inside an embedded
//! interpreter. The module does the real work (Jinja expansion, keyword
//! resolution, assistant token masks); this crate moves requests to it and
//! results back, and owns the rules for doing that safely.
//!
//! ## Layers
//!
//! - [`Value`], [`RenderRequest`], [`FetchTemplateRequest`] and friends: the
//!   JSON wire contract, via [`codec`].
//! - [`ForeignRuntime`]: the entry points the module exposes. Implemented for
//!   CPython by the `chat-templates-python` crate, and by
//!   `testing::FakeRuntime` (feature `test-utils`).
//! - [`ChatTemplateProcessor`]: lifecycle and boundary calls.
//! - [`diagnostics`]: allocator statistics traced around each call.
//!
//! ## A boundary call
//!
//! ```text
//!  RenderRequest ──encode──► HostBuffer ──render()──► ForeignBuffer
//!                           (host alloc)              (runtime alloc)
//!                                │                          │ copy
//!                              drop                         ▼
//!                                                        Vec<u8> ──► free_result()
//!                                                           │
//!  RenderResponse ◄──decode─────────────────────────────────┘
//! ```
//!
//! Each buffer is released by the allocator family that produced it,
//! exactly once, whatever path the call takes.
//!
//! ## Example
//!
//! ```rust,ignore
//! use chat_templates::{ChatMessage, ChatTemplateProcessor, ProcessorConfig, RenderRequest};
//!
//! let processor = ChatTemplateProcessor::new(runtime, ProcessorConfig::default());
//! processor.initialize()?;
//!
//! let response = processor.render_chat_template(&RenderRequest {
//!     add_generation_prompt: true,
//!     ..RenderRequest::new(vec![ChatMessage::user("What is 2+2?")])
//! })?;
//! println!("{}", response.rendered_chats[0]);
//!
//! processor.finalize();
//! ```

mod buffer;
pub mod codec;
pub mod diagnostics;
mod error;
mod foreign;
mod lifecycle;
mod processor;
mod types;
mod value;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use buffer::BufferStats;
pub use diagnostics::{CountingAllocator, MemStats};
pub use error::{Error, Operation, Result};
pub use foreign::ForeignRuntime;
pub use lifecycle::LifecycleState;
pub use processor::{ChatTemplateProcessor, ProcessorConfig, STARTUP_PANIC_STATUS};
pub use types::{
    ChatMessage, FetchTemplateRequest, FetchTemplateResponse, Kwargs, RenderRequest,
    RenderResponse, SecretToken,
};
pub use value::Value;
