//! The chat template processor: lifecycle plus boundary calls.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, error, trace, warn};

use crate::buffer::{BufferLedger, BufferStats, ForeignBuffer, HostBuffer};
use crate::codec;
use crate::diagnostics::{trace_mem_stats, Phase};
use crate::error::{Error, Operation, Result};
use crate::foreign::{Entry, ForeignRuntime};
use crate::lifecycle::{Lifecycle, LifecycleState};
use crate::types::{
    FetchTemplateRequest, FetchTemplateResponse, Kwargs, RenderRequest, RenderResponse,
};

/// Status reported when the runtime panics during startup.
pub const STARTUP_PANIC_STATUS: i32 = -1;

/// Configuration for a [`ChatTemplateProcessor`].
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    /// Emit allocator snapshots before and after each boundary call.
    pub mem_stats: bool,

    /// Sleep between checks while `finalize` waits for in-flight calls.
    pub drain_poll: Duration,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            mem_stats: true,
            drain_poll: Duration::from_millis(1),
        }
    }
}

/// Renders and fetches chat templates through an embedded interpreter.
///
/// The processor owns the runtime and guards access to it. It must be
/// initialized before use and finalized exactly once afterwards:
///
/// ```ignore
/// let processor = ChatTemplateProcessor::new(runtime, ProcessorConfig::default());
/// processor.initialize()?;
///
/// let response = processor.render_chat_template(&RenderRequest::new(vec![
///     ChatMessage::user("hi"),
/// ]))?;
///
/// processor.finalize();
/// ```
///
/// Calls made before `initialize` succeeds, or once `finalize` has begun,
/// fail with [`Error::NotInitialized`] without touching the runtime.
///
/// The processor is `Sync` and meant to be shared behind an `Arc`.
/// Concurrent calls are not serialized here; they queue on the runtime's own
/// lock.
pub struct ChatTemplateProcessor<R: ForeignRuntime> {
    runtime: R,
    config: ProcessorConfig,
    lifecycle: Lifecycle,
    ledger: BufferLedger,
}

impl<R: ForeignRuntime> ChatTemplateProcessor<R> {
    /// Wrap a runtime. Nothing is started until [`initialize`](Self::initialize).
    pub fn new(runtime: R, config: ProcessorConfig) -> Self {
        Self {
            runtime,
            config,
            lifecycle: Lifecycle::default(),
            ledger: BufferLedger::default(),
        }
    }

    pub fn runtime(&self) -> &R {
        &self.runtime
    }

    pub fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    pub fn state(&self) -> LifecycleState {
        self.lifecycle.state()
    }

    /// Buffers created and released over the processor's lifetime.
    pub fn buffer_stats(&self) -> BufferStats {
        self.ledger.snapshot()
    }

    fn mem_stats(&self, operation: Operation, phase: Phase) {
        if self.config.mem_stats {
            trace_mem_stats(operation, phase);
        }
    }

    /// Start the interpreter and initialize the template module.
    ///
    /// If the module fails, this returns [`Error::ModuleInit`] and the
    /// interpreter is left running: [`finalize`](Self::finalize) must still
    /// be called.
    pub fn initialize(&self) -> Result<()> {
        let operation = Operation::Initialize;
        self.lifecycle.begin_start()?;
        debug!(operation = %operation, "starting interpreter");
        self.mem_stats(operation, Phase::Before);

        let started = catch_unwind(AssertUnwindSafe(|| {
            self.runtime.start_interpreter();
            self.runtime.init_module()
        }));
        self.mem_stats(operation, Phase::After);
        let status = match started {
            Ok(status) => status,
            Err(_) => {
                error!(operation = %operation, "runtime panicked during startup");
                STARTUP_PANIC_STATUS
            }
        };

        if status != 0 {
            self.lifecycle.finish_start(false);
            error!(
                operation = %operation,
                status,
                "chat template module failed to initialize; finalize is still required"
            );
            return Err(Error::ModuleInit { status });
        }

        self.lifecycle.finish_start(true);
        debug!(operation = %operation, "interpreter ready");
        Ok(())
    }

    /// Tear down the module and stop the interpreter.
    ///
    /// New calls are refused as soon as this begins; calls already inside
    /// the runtime are allowed to finish first. Panics raised during teardown
    /// are logged and swallowed. Does nothing if nothing is running.
    pub fn finalize(&self) {
        let operation = Operation::Finalize;
        let Some(previous) = self.lifecycle.begin_finalize() else {
            debug!(operation = %operation, state = %self.state(), "nothing to finalize");
            return;
        };
        debug!(operation = %operation, from = %previous, "finalizing interpreter");

        let pending = self.lifecycle.in_flight();
        if pending > 0 {
            debug!(operation = %operation, pending, "waiting for in-flight calls");
        }
        self.lifecycle.wait_idle(self.config.drain_poll);

        self.mem_stats(operation, Phase::Before);
        if catch_unwind(AssertUnwindSafe(|| self.runtime.cleanup_module())).is_err() {
            error!(operation = %operation, "runtime panicked during module cleanup");
        }
        if catch_unwind(AssertUnwindSafe(|| self.runtime.stop_interpreter())).is_err() {
            error!(operation = %operation, "runtime panicked while stopping the interpreter");
        }

        self.mem_stats(operation, Phase::After);
        self.lifecycle.finish_finalize();
        debug!(operation = %operation, "interpreter finalized");
    }

    /// Render a conversation through its chat template.
    pub fn render_chat_template(&self, request: &RenderRequest) -> Result<RenderResponse> {
        let operation = Operation::RenderChatTemplate;
        debug!(
            operation = %operation,
            messages = request.messages.len(),
            tools = request.tools.len(),
            documents = request.documents.len(),
            override_template = request.chat_template.is_some(),
            "render called"
        );
        validate_render(request)?;

        let (response, len): (RenderResponse, usize) =
            self.call(operation, Entry::Render, request)?;

        if request.return_assistant_tokens_mask
            && response.generation_indices.len() != response.rendered_chats.len()
        {
            warn!(
                operation = %operation,
                chats = response.rendered_chats.len(),
                indices = response.generation_indices.len(),
                "generation indices do not match rendered chats"
            );
            return Err(Error::Decoding {
                operation,
                len,
                message: format!(
                    "{} generation index entries for {} rendered chats",
                    response.generation_indices.len(),
                    response.rendered_chats.len()
                ),
            });
        }
        Ok(response)
    }

    /// Resolve the chat template, and the keyword arguments it expects, for
    /// a model.
    pub fn fetch_chat_template(
        &self,
        request: &FetchTemplateRequest,
    ) -> Result<(String, Option<Kwargs>)> {
        let operation = Operation::FetchChatTemplate;
        debug!(
            operation = %operation,
            model = %request.model,
            revision = request.revision.as_deref().unwrap_or(""),
            is_local_path = request.is_local_path,
            has_token = request.token.is_some(),
            "fetch called"
        );
        if request.model.is_empty() {
            return Err(Error::InvalidInput {
                operation,
                message: "model identifier is empty".to_string(),
            });
        }

        let (response, _): (FetchTemplateResponse, usize) =
            self.call(operation, Entry::FetchTemplate, request)?;
        Ok((response.chat_template, response.chat_template_kwargs))
    }

    /// Drop every cache held by the template module. Meant for tests and
    /// maintenance.
    pub fn clear_caches(&self) -> Result<()> {
        let operation = Operation::ClearCaches;
        let _call = self.lifecycle.enter(operation)?;

        self.mem_stats(operation, Phase::Before);
        let raw = catch_unwind(AssertUnwindSafe(|| self.runtime.clear_caches()))
            .unwrap_or_else(|_| {
                error!(operation = %operation, "runtime panicked");
                std::ptr::null_mut()
            });
        self.mem_stats(operation, Phase::After);
        // Safety: the pointer is null or a fresh result of this runtime.
        let sentinel =
            unsafe { ForeignBuffer::from_raw(&self.runtime, raw, operation, &self.ledger) };
        if sentinel.is_none() {
            error!(operation = %operation, "failed to clear caches");
            return Err(Error::CacheClearFailed);
        }
        drop(sentinel);

        debug!(operation = %operation, "caches cleared");
        Ok(())
    }

    /// One request/response boundary crossing. Returns the decoded response
    /// and the size of the raw result.
    ///
    /// Both buffers are released before the response is parsed, so a
    /// decoding failure cannot leak either of them.
    fn call<Req, Resp>(
        &self,
        operation: Operation,
        entry: Entry,
        request: &Req,
    ) -> Result<(Resp, usize)>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let _call = self.lifecycle.enter(operation)?;

        let payload = codec::encode(operation, request)?;
        let request_buffer = HostBuffer::new(operation, payload, &self.ledger)?;

        self.mem_stats(operation, Phase::Before);
        let raw = catch_unwind(AssertUnwindSafe(|| {
            // Safety: request_buffer is NUL-terminated and outlives the call.
            unsafe { entry.invoke(&self.runtime, request_buffer.as_ptr()) }
        }))
        .unwrap_or_else(|_| {
            error!(operation = %operation, "runtime panicked");
            std::ptr::null_mut()
        });
        self.mem_stats(operation, Phase::After);

        // Safety: the pointer is null or a fresh result of this runtime.
        let result =
            unsafe { ForeignBuffer::from_raw(&self.runtime, raw, operation, &self.ledger) };
        let bytes = match result {
            Some(result) => result.to_vec(),
            None => {
                error!(
                    operation = %operation,
                    request_bytes = request_buffer.len(),
                    "foreign call returned no result"
                );
                return Err(Error::ForeignCallFailed { operation });
            }
        };
        drop(request_buffer);

        trace!(operation = %operation, bytes = bytes.len(), "received result");
        if bytes.is_empty() {
            error!(operation = %operation, "foreign call returned an empty result");
            return Err(Error::ForeignCallFailed { operation });
        }

        let response = codec::decode(operation, &bytes).map_err(|e| {
            error!(
                operation = %operation,
                bytes = bytes.len(),
                error = %e,
                "failed to decode result"
            );
            e
        })?;

        Ok((response, bytes.len()))
    }
}

fn validate_render(request: &RenderRequest) -> Result<()> {
    let operation = Operation::RenderChatTemplate;
    if request.messages.is_empty() {
        return Err(Error::InvalidInput {
            operation,
            message: "conversation has no messages".to_string(),
        });
    }
    if let Some(index) = request.messages.iter().position(|m| m.role.is_empty()) {
        return Err(Error::InvalidInput {
            operation,
            message: format!("message {} has an empty role", index),
        });
    }
    Ok(())
}
