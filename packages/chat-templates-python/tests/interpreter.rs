//! Runs the bridge against a real CPython interpreter.
//!
//! One process hosts one interpreter, so everything lives in a single test.

use std::io;
use std::sync::{Arc, Mutex};

use chat_templates::{
    BufferStats, ChatMessage, ChatTemplateProcessor, Error, FetchTemplateRequest,
    LifecycleState, Operation, ProcessorConfig, RenderRequest, SecretToken, Value,
};
use chat_templates_python::{PythonConfig, PythonRuntime};
use tracing::Level;
use tracing_subscriber::fmt::MakeWriter;

const TOKEN: &str = "secret123";

const WRAPPER: &str = r#"
import json

_templates = {}


def render_jinja_template(request_json):
    request = json.loads(request_json)
    rendered = "|".join(m["content"] for m in request["messages"])
    return json.dumps({"rendered_chats": [rendered], "generation_indices": []})


def get_model_chat_template(request_json):
    request = json.loads(request_json)
    if request["model"] == "private/model":
        raise PermissionError("token " + request.get("token", "") + " was rejected")
    _templates[request["model"]] = "{{ messages }}"
    return json.dumps({
        "chat_template": _templates[request["model"]],
        "chat_template_kwargs": {"bos_token": "<s>"},
    })


def clear_caches():
    _templates.clear()
    return "{}"
"#;

#[derive(Clone, Default)]
struct Captured(Arc<Mutex<Vec<u8>>>);

impl Captured {
    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl io::Write for Captured {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for Captured {
    type Writer = Captured;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

fn round(processor: &ChatTemplateProcessor<PythonRuntime>) {
    processor.initialize().unwrap();
    assert_eq!(processor.state(), LifecycleState::Ready);

    let response = processor
        .render_chat_template(&RenderRequest::new(vec![
            ChatMessage::user("a"),
            ChatMessage::assistant("b"),
        ]))
        .unwrap();
    assert_eq!(response.rendered_chats, vec!["a|b"]);
    assert!(response.generation_indices.is_empty());

    let (template, kwargs) = processor
        .fetch_chat_template(&FetchTemplateRequest::new("public/model"))
        .unwrap();
    assert_eq!(template, "{{ messages }}");
    assert_eq!(kwargs.unwrap().get("bos_token"), Some(&Value::from("<s>")));

    let err = processor
        .fetch_chat_template(&FetchTemplateRequest {
            token: Some(SecretToken::new(TOKEN)),
            ..FetchTemplateRequest::new("private/model")
        })
        .unwrap_err();
    assert!(matches!(
        err,
        Error::ForeignCallFailed {
            operation: Operation::FetchChatTemplate
        }
    ));
    assert!(!err.to_string().contains(TOKEN));

    processor.clear_caches().unwrap();

    processor.finalize();
    assert_eq!(processor.state(), LifecycleState::Finalized);
}

#[test]
fn interpreter_lifecycle() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("chat_template_wrapper.py"), WRAPPER).unwrap();

    let config = PythonConfig::default().with_python_path(dir.path());
    let runtime = PythonRuntime::new(config).unwrap();
    let processor = ChatTemplateProcessor::new(runtime, ProcessorConfig::default());

    let captured = Captured::default();
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(Level::TRACE)
        .with_writer(captured.clone())
        .with_ansi(false)
        .finish();

    tracing::subscriber::with_default(subscriber, || {
        // The interpreter restarts cleanly after a finalize.
        round(&processor);
        round(&processor);
    });

    assert_eq!(
        processor.buffer_stats(),
        BufferStats {
            host_allocated: 6,
            host_released: 6,
            foreign_received: 6,
            foreign_released: 6,
        }
    );

    let logs = captured.contents();
    assert!(logs.contains("python interpreter started"), "{}", logs);
    assert!(logs.contains("python interpreter stopped"), "{}", logs);
    assert!(logs.contains("PermissionError"), "{}", logs);
    assert!(!logs.contains(TOKEN), "token leaked into logs:\n{}", logs);
}
