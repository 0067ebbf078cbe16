use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use serde_json::{Map, Value};
use tokio::io::AsyncRead;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tracing::{debug, warn};

use crate::error::{HandlerError, ProtocolError};
use crate::framer::JsonFramer;
use crate::task::Task;

use super::message::{OutgoingRequest, RawMessage, Response};

/// The arguments a registered method handler receives, classified by the
/// shape of the inbound `params` field.
#[derive(Debug, Clone)]
pub enum Params {
    None,
    Positional(Vec<Value>),
    Keyword(Map<String, Value>),
}

type HandlerFuture = Pin<Box<dyn Future<Output = Result<Value, HandlerError>> + Send>>;

/// A registered method handler. Boxed and type-erased so the dispatch table
/// can hold handlers of differing concrete closures (and so a handler may
/// itself be `async`, e.g. one that mutates a `Machine`).
pub type Handler = Arc<dyn Fn(Params) -> HandlerFuture + Send + Sync>;

/// Construction-time settings for an [`Endpoint`]. Reserved for forward
/// compatibility (e.g. output buffering, request timeouts); currently empty
/// but kept as a struct, not a bare `()`, so callers already have a stable
/// place to add fields without changing `Endpoint::new`'s signature.
#[derive(Debug, Clone, Default)]
pub struct EndpointConfig {}

/// A bidirectional JSON-RPC 2.0 endpoint: a dispatch table for inbound
/// requests (server role) plus a pending-id map correlating outbound
/// requests to their eventual responses (client role).
///
/// One endpoint owns one outbound byte stream (fed by an internal writer
/// task) and is driven by [`Endpoint::run`] over one inbound byte stream.
/// Any number of caller tasks may call `add_method`/`del_method`/`notify`/
/// `request` concurrently.
pub struct Endpoint {
    #[allow(dead_code)]
    config: EndpointConfig,
    methods: StdMutex<HashMap<String, Handler>>,
    pending: AsyncMutex<HashMap<u64, Arc<Task>>>,
    next_id: AtomicU64,
    writer: mpsc::UnboundedSender<String>,
}

impl Endpoint {
    /// Spawns the writer task over `output` and returns a ready-to-use
    /// endpoint. Call [`Endpoint::run`] separately to drive inbound traffic.
    pub fn new<W>(output: W, config: EndpointConfig) -> Arc<Self>
    where
        W: tokio::io::AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(writer_task(output, rx));
        Arc::new(Self {
            config,
            methods: StdMutex::new(HashMap::new()),
            pending: AsyncMutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            writer: tx,
        })
    }

    pub fn add_method(&self, name: impl Into<String>, handler: Handler) {
        self.methods.lock().unwrap().insert(name.into(), handler);
    }

    pub fn del_method(&self, name: &str) {
        self.methods.lock().unwrap().remove(name);
    }

    fn send_line(&self, line: String) {
        if self.writer.send(line).is_err() {
            warn!("endpoint output channel is closed; dropping outbound message");
        }
    }

    /// Fire-and-forget outbound notification; never produces a response.
    pub fn notify(&self, method: impl Into<String>, params: Option<Value>) {
        let message = OutgoingRequest::notification(method, params);
        match serde_json::to_string(&message) {
            Ok(text) => self.send_line(text),
            Err(err) => warn!("failed to serialize outbound notification: {err}"),
        }
    }

    /// Sends an outbound request and returns a [`Task`] that ends with the
    /// peer's result or fails with the peer's error object (a JSON value
    /// shaped `{code, message, data?}`). If the output channel is already
    /// closed the task is failed immediately rather than returning an error,
    /// so callers always get a `Task` back.
    pub async fn request(&self, method: impl Into<String>, params: Option<Value>) -> Arc<Task> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let task = Task::new();
        task.start();

        {
            let mut pending = self.pending.lock().await;
            pending.insert(id, task.clone());
        }

        let message = OutgoingRequest::request(method, params, Value::from(id));
        let text = match serde_json::to_string(&message) {
            Ok(text) => text,
            Err(err) => {
                self.pending.lock().await.remove(&id);
                task.fail(serde_json::json!({"message": err.to_string()}));
                return task;
            }
        };

        if self.writer.send(text).is_err() {
            self.pending.lock().await.remove(&id);
            task.fail(serde_json::json!({"message": "output channel closed"}));
        }

        task
    }

    /// Drives `reader` until EOF, dispatching every complete JSON value the
    /// framer yields. Each message is fully handled (including any async
    /// handler invocation) before the next is read, so dispatch order always
    /// matches arrival order.
    pub async fn run<R>(self: &Arc<Self>, reader: R)
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        let mut framer = JsonFramer::new();
        framer.event.attach(move |text| {
            let _ = tx.send(text);
        });

        let feeder = tokio::spawn(async move {
            if let Err(err) = framer.feedfile(reader).await {
                warn!("error reading endpoint input: {err}");
            }
        });

        while let Some(text) = rx.recv().await {
            self.handle_text(&text).await;
        }

        let _ = feeder.await;
    }

    async fn handle_text(self: &Arc<Self>, text: &str) {
        let value: Value = match serde_json::from_str(text) {
            Ok(value) => value,
            Err(_) => {
                self.reply(Response::error(
                    ProtocolError::ParseError.code(),
                    ProtocolError::ParseError.message(),
                    None,
                    Value::Null,
                ));
                return;
            }
        };

        match value {
            Value::Array(items) if items.is_empty() => {
                self.reply(Response::error(
                    ProtocolError::InvalidRequest.code(),
                    ProtocolError::InvalidRequest.message(),
                    None,
                    Value::Null,
                ));
            }
            Value::Array(items) => {
                let mut replies = Vec::with_capacity(items.len());
                for item in items {
                    if let Some(response) = self.classify_and_handle(item).await {
                        replies.push(serde_json::to_value(response).unwrap_or(Value::Null));
                    }
                }
                if !replies.is_empty() {
                    self.send_line(Value::Array(replies).to_string());
                }
            }
            other => {
                if let Some(response) = self.classify_and_handle(other).await {
                    self.reply(response);
                }
            }
        }
    }

    fn reply(&self, response: Response) {
        match serde_json::to_string(&response) {
            Ok(text) => self.send_line(text),
            Err(err) => warn!("failed to serialize response: {err}"),
        }
    }

    /// Handles one non-batch JSON value: a request/notification shape, a
    /// response shape, or anything else (invalid request). Returns the
    /// response to send, if any (`None` for notifications, correlated
    /// responses, and... nothing else — every other path produces a value).
    async fn classify_and_handle(self: &Arc<Self>, value: Value) -> Option<Response> {
        let Value::Object(_) = &value else {
            return Some(Response::error(
                ProtocolError::InvalidRequest.code(),
                ProtocolError::InvalidRequest.message(),
                None,
                Value::Null,
            ));
        };

        let raw: RawMessage = match serde_json::from_value(value.clone()) {
            Ok(raw) => raw,
            Err(_) => {
                return Some(Response::error(
                    ProtocolError::InvalidRequest.code(),
                    ProtocolError::InvalidRequest.message(),
                    None,
                    Value::Null,
                ))
            }
        };

        if raw.is_request_shaped() {
            self.handle_request(raw).await
        } else if raw.is_response_shaped() {
            self.handle_response(raw).await;
            None
        } else {
            let id = raw.id.unwrap_or(Value::Null);
            Some(Response::error(
                ProtocolError::InvalidRequest.code(),
                ProtocolError::InvalidRequest.message(),
                None,
                id,
            ))
        }
    }

    async fn handle_request(self: &Arc<Self>, raw: RawMessage) -> Option<Response> {
        let method = raw.method.expect("request-shaped message has a method");
        let id = raw.id.clone();

        let handler = self.methods.lock().unwrap().get(&method).cloned();
        let Some(handler) = handler else {
            debug!("method not found: {method}");
            return id.map(|id| {
                Response::error(
                    ProtocolError::MethodNotFound(method.clone()).code(),
                    ProtocolError::MethodNotFound(method).message(),
                    None,
                    id,
                )
            });
        };

        let params = match raw.params {
            None => Params::None,
            Some(Value::Array(items)) => Params::Positional(items),
            Some(Value::Object(map)) => Params::Keyword(map),
            Some(_) => {
                return id.map(|id| {
                    Response::error(
                        ProtocolError::InvalidParams.code(),
                        ProtocolError::InvalidParams.message(),
                        None,
                        id,
                    )
                })
            }
        };

        match handler(params).await {
            Ok(result) => id.map(|id| Response::success(result, id)),
            Err(HandlerError::Rpc { code, message, data }) => {
                id.map(|id| Response::error(code, message, data, id))
            }
            Err(HandlerError::Other(err)) => id.map(|id| {
                let data = serde_json::json!({
                    "name": "uncaught exception",
                    "args": [],
                    "message": err.to_string(),
                });
                Response::error(-32000, "uncaught exception", Some(data), id)
            }),
        }
    }

    async fn handle_response(&self, raw: RawMessage) {
        let Some(id_value) = raw.id else {
            warn!("response message missing id");
            return;
        };
        let Some(id) = id_value.as_u64() else {
            warn!("response with non-numeric id {id_value} dropped");
            return;
        };

        let task = self.pending.lock().await.remove(&id);
        let Some(task) = task else {
            warn!("response for unknown request id {id} dropped");
            return;
        };

        if let Some(error) = raw.error {
            task.fail(serde_json::to_value(error).unwrap_or(Value::Null));
        } else {
            task.end(raw.result.unwrap_or(Value::Null));
        }
    }
}

async fn writer_task<W>(mut output: W, mut rx: mpsc::UnboundedReceiver<String>)
where
    W: tokio::io::AsyncWrite + Unpin,
{
    use tokio::io::AsyncWriteExt;

    while let Some(line) = rx.recv().await {
        if output.write_all(line.as_bytes()).await.is_err() {
            break;
        }
        if output.write_all(b"\n").await.is_err() {
            break;
        }
        if output.flush().await.is_err() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskState;
    use serde_json::json;

    fn sync_handler<F>(f: F) -> Handler
    where
        F: Fn(Params) -> Result<Value, HandlerError> + Send + Sync + 'static,
    {
        Arc::new(move |params| {
            let result = f(params);
            Box::pin(async move { result })
        })
    }

    fn positional_args(params: Params) -> Result<Vec<Value>, HandlerError> {
        match params {
            Params::Positional(items) => Ok(items),
            Params::Keyword(_) => Err(HandlerError::rpc(-32602, "invalid params", None)),
            Params::None => Err(HandlerError::rpc(-32602, "invalid params", None)),
        }
    }

    fn as_f64(v: &Value) -> f64 {
        v.as_f64().unwrap()
    }

    async fn endpoint_with_output() -> (Arc<Endpoint>, tokio::io::DuplexStream) {
        let (writer_side, reader_side) = tokio::io::duplex(64 * 1024);
        let endpoint = Endpoint::new(writer_side, EndpointConfig::default());
        (endpoint, reader_side)
    }

    #[tokio::test]
    async fn positional_call_scenario() {
        let (endpoint, _reader) = endpoint_with_output().await;
        endpoint.add_method(
            "subtract",
            sync_handler(|params| match params {
                Params::Positional(items) if items.len() == 2 => {
                    Ok(json!(as_f64(&items[0]) - as_f64(&items[1])))
                }
                Params::Keyword(map) => {
                    let minuend = map.get("minuend").map(as_f64).unwrap_or(0.0);
                    let subtrahend = map.get("subtrahend").map(as_f64).unwrap_or(0.0);
                    Ok(json!(minuend - subtrahend))
                }
                _ => Err(HandlerError::rpc(-32602, "invalid params", None)),
            }),
        );

        let raw = RawMessage {
            jsonrpc: Some("2.0".into()),
            method: Some("subtract".into()),
            params: Some(json!([42, 23])),
            id: Some(json!(1)),
            result: None,
            error: None,
        };
        let response = endpoint.handle_request(raw).await.unwrap();
        let text = serde_json::to_string(&response).unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["result"], 19.0);
        assert_eq!(value["id"], 1);
    }

    #[tokio::test]
    async fn named_params_scenario() {
        let (endpoint, _reader) = endpoint_with_output().await;
        endpoint.add_method(
            "subtract",
            sync_handler(|params| match params {
                Params::Keyword(map) => {
                    let minuend = map.get("minuend").map(as_f64).unwrap_or(0.0);
                    let subtrahend = map.get("subtrahend").map(as_f64).unwrap_or(0.0);
                    Ok(json!(minuend - subtrahend))
                }
                _ => Err(HandlerError::rpc(-32602, "invalid params", None)),
            }),
        );

        let raw = RawMessage {
            jsonrpc: Some("2.0".into()),
            method: Some("subtract".into()),
            params: Some(json!({"subtrahend": 23, "minuend": 42})),
            id: Some(json!(3)),
            result: None,
            error: None,
        };
        let response = endpoint.handle_request(raw).await.unwrap();
        let value: Value = serde_json::to_value(response).unwrap();
        assert_eq!(value["result"], 19.0);
        assert_eq!(value["id"], 3);
    }

    #[tokio::test]
    async fn notification_produces_no_response() {
        let (endpoint, _reader) = endpoint_with_output().await;
        let called = Arc::new(StdMutex::new(false));
        let flag = called.clone();
        endpoint.add_method(
            "update",
            sync_handler(move |params| {
                *flag.lock().unwrap() = true;
                let _ = positional_args(params)?;
                Ok(Value::Null)
            }),
        );

        let raw = RawMessage {
            jsonrpc: Some("2.0".into()),
            method: Some("update".into()),
            params: Some(json!([1, 2, 3, 4, 5])),
            id: None,
            result: None,
            error: None,
        };
        let response = endpoint.handle_request(raw).await;
        assert!(response.is_none());
        assert!(*called.lock().unwrap());
    }

    #[tokio::test]
    async fn unknown_method_scenario() {
        let (endpoint, _reader) = endpoint_with_output().await;
        let raw = RawMessage {
            jsonrpc: Some("2.0".into()),
            method: Some("foobar".into()),
            params: None,
            id: Some(json!("1")),
            result: None,
            error: None,
        };
        let response = endpoint.handle_request(raw).await.unwrap();
        let value: Value = serde_json::to_value(response).unwrap();
        assert_eq!(value["error"]["code"], -32601);
        assert_eq!(value["error"]["message"], "method not found");
        assert_eq!(value["id"], "1");
    }

    #[tokio::test]
    async fn empty_batch_scenario() {
        use tokio::io::AsyncReadExt;

        let (endpoint, mut reader) = endpoint_with_output().await;
        endpoint.handle_text("[]").await;

        let mut buf = [0u8; 256];
        let n = reader.read(&mut buf).await.unwrap();
        let value: Value = serde_json::from_slice(&buf[..n]).unwrap();
        assert_eq!(value["error"]["code"], -32600);
        assert_eq!(value["error"]["message"], "invalid request");
        assert_eq!(value["id"], Value::Null);
    }

    #[tokio::test]
    async fn non_object_top_level_value_is_invalid_request() {
        let (endpoint, _reader) = endpoint_with_output().await;
        let response = endpoint.classify_and_handle(json!(42)).await;
        let value: Value = serde_json::to_value(response.unwrap()).unwrap();
        assert_eq!(value["error"]["code"], -32600);
        assert_eq!(value["id"], Value::Null);
    }

    #[tokio::test]
    async fn uncaught_handler_error_maps_to_dash32000() {
        let (endpoint, _reader) = endpoint_with_output().await;
        endpoint.add_method(
            "boom",
            sync_handler(|_| {
                Err(HandlerError::other(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "kaboom",
                )))
            }),
        );
        let raw = RawMessage {
            jsonrpc: Some("2.0".into()),
            method: Some("boom".into()),
            params: None,
            id: Some(json!(7)),
            result: None,
            error: None,
        };
        let response = endpoint.handle_request(raw).await.unwrap();
        let value: Value = serde_json::to_value(response).unwrap();
        assert_eq!(value["error"]["code"], -32000);
        assert_eq!(value["error"]["data"]["message"], "kaboom");
    }

    #[tokio::test]
    async fn outbound_request_ids_strictly_increase_and_correlate() {
        let (endpoint, _reader) = endpoint_with_output().await;
        let task_a = endpoint.request("ping", None).await;
        let task_b = endpoint.request("ping", None).await;
        assert!(endpoint.pending.lock().await.len() == 2);

        let ids: Vec<u64> = endpoint.pending.lock().await.keys().copied().collect();
        let mut sorted = ids.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, vec![1, 2]);

        let response_a = RawMessage {
            jsonrpc: Some("2.0".into()),
            method: None,
            params: None,
            id: Some(json!(1)),
            result: Some(json!(42)),
            error: None,
        };
        endpoint.handle_response(response_a).await;
        assert_eq!(task_a.state(), TaskState::Ended);
        assert_eq!(task_a.result(), Some(json!(42)));
        assert_eq!(endpoint.pending.lock().await.len(), 1);

        let _ = task_b;
    }

    #[tokio::test]
    async fn response_with_unknown_id_is_dropped_without_panicking() {
        let (endpoint, _reader) = endpoint_with_output().await;
        let response = RawMessage {
            jsonrpc: Some("2.0".into()),
            method: None,
            params: None,
            id: Some(json!(999)),
            result: Some(json!("orphan")),
            error: None,
        };
        endpoint.handle_response(response).await;
        assert!(endpoint.pending.lock().await.is_empty());
    }
}
