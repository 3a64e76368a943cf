use crate::utils::method::Method;

/// Errors raised while dispatching on a router.
///
/// ルータのディスパッチ時のエラー
pub enum RouterError {
    /// No endpoint matched the channel.
    NoMatch(String),
    /// A match exists but no controller is registered for the verb.
    NoController(Method, String),
    /// A guard returned false.
    GuardRejected(String),
    /// The payload schema rejected the payload.
    Validation(String),
    /// A guard, middleware or handler failed internally.
    Handler(String),
}

impl std::fmt::Display for RouterError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            RouterError::NoMatch(channel) => write!(f, "No route matched channel: {}", channel),
            RouterError::NoController(method, channel) => write!(f, "No {} controller on channel: {}", method, channel),
            RouterError::GuardRejected(channel) => write!(f, "Access denied by guard on channel: {}", channel),
            RouterError::Validation(message) => write!(f, "Payload validation failed: {}", message),
            RouterError::Handler(message) => write!(f, "Handler error: {}", message),
        }
    }
}

impl std::fmt::Debug for RouterError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            RouterError::NoMatch(channel) => write!(f, "No route matched channel: {}", channel),
            RouterError::NoController(method, channel) => write!(f, "No {} controller on channel: {}", method, channel),
            RouterError::GuardRejected(channel) => write!(f, "Access denied by guard on channel: {}", channel),
            RouterError::Validation(message) => write!(f, "Payload validation failed: {}", message),
            RouterError::Handler(message) => write!(f, "Handler error: {}", message),
        }
    }
}

impl std::error::Error for RouterError {}

/// Client-side error kinds, each mapped to a machine-readable code.
///
/// クライアント側エラーの種別（機械可読コード付き）
#[derive(Clone, PartialEq, Eq)]
pub enum ClientErrorKind {
    /// The request did not settle within the configured timeout.
    Timeout,
    /// The caller aborted the request before it settled.
    Aborted,
    NoMatch,
    AccessDenied,
    Validation(String),
    /// The transport adapter reported a failure.
    Adapter(String),
    Internal(String),
}

/// Error surfaced by the client facade.
///
/// Carries the resolved channel and the trace id of the request that
/// produced it so callers can correlate failures across the transport.
#[derive(Clone)]
pub struct ClientError {
    pub kind: ClientErrorKind,
    pub channel: Option<String>,
    pub trace_id: Option<String>,
}

impl ClientError {
    #[inline]
    pub fn new(kind: ClientErrorKind) -> ClientError {
        ClientError {
            kind,
            channel: None,
            trace_id: None,
        }
    }

    /// Attach the resolved channel to the error.
    #[inline]
    pub fn with_channel(mut self, channel: &str) -> ClientError {
        self.channel = Some(channel.to_string());
        self
    }

    /// Attach the request trace id to the error.
    #[inline]
    pub fn with_trace_id(mut self, trace_id: &str) -> ClientError {
        self.trace_id = Some(trace_id.to_string());
        self
    }

    /// Machine-readable error code.
    ///
    /// 機械可読のエラーコードを返す
    #[inline]
    pub fn code(&self) -> &'static str {
        match &self.kind {
            ClientErrorKind::Timeout => "TIMEOUT",
            ClientErrorKind::Aborted => "ABORTED",
            ClientErrorKind::NoMatch => "NO_MATCH",
            ClientErrorKind::AccessDenied => "ACCESS_DENIED",
            ClientErrorKind::Validation(_) => "VALIDATION",
            ClientErrorKind::Adapter(_) => "ADAPTER",
            ClientErrorKind::Internal(_) => "INTERNAL",
        }
    }
}

impl std::fmt::Display for ClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let channel = self.channel.as_deref().unwrap_or("<unresolved>");
        match &self.kind {
            ClientErrorKind::Timeout => write!(f, "[TIMEOUT] request timed out on channel: {}", channel),
            ClientErrorKind::Aborted => write!(f, "[ABORTED] request aborted on channel: {}", channel),
            ClientErrorKind::NoMatch => write!(f, "[NO_MATCH] no route matched channel: {}", channel),
            ClientErrorKind::AccessDenied => write!(f, "[ACCESS_DENIED] guard rejected channel: {}", channel),
            ClientErrorKind::Validation(message) => write!(f, "[VALIDATION] {} (channel: {})", message, channel),
            ClientErrorKind::Adapter(message) => write!(f, "[ADAPTER] {} (channel: {})", message, channel),
            ClientErrorKind::Internal(message) => write!(f, "[INTERNAL] {} (channel: {})", message, channel),
        }
    }
}

impl std::fmt::Debug for ClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self)?;
        if let Some(trace_id) = &self.trace_id {
            write!(f, " trace_id={}", trace_id)?;
        }
        Ok(())
    }
}

impl std::error::Error for ClientError {}

/// Wire form of an adapter-reported failure, carried under the response
/// envelope's `$error` field and re-thrown client-side as a typed error.
///
/// アダプタ報告エラーのワイヤ表現
#[derive(serde::Serialize, serde::Deserialize)]
pub struct ErrorEnvelope {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(rename = "traceId", skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
}

impl ErrorEnvelope {
    pub fn into_client_error(self) -> ClientError {
        let kind = match self.code.as_str() {
            "TIMEOUT" => ClientErrorKind::Timeout,
            "ABORTED" => ClientErrorKind::Aborted,
            "NO_MATCH" => ClientErrorKind::NoMatch,
            "ACCESS_DENIED" => ClientErrorKind::AccessDenied,
            "VALIDATION" => ClientErrorKind::Validation(self.message),
            "INTERNAL" => ClientErrorKind::Internal(self.message),
            _ => ClientErrorKind::Adapter(self.message),
        };
        ClientError {
            kind,
            channel: self.channel,
            trace_id: self.trace_id,
        }
    }
}

impl From<RouterError> for ClientError {
    fn from(err: RouterError) -> ClientError {
        match err {
            RouterError::NoMatch(channel) => ClientError::new(ClientErrorKind::NoMatch).with_channel(&channel),
            RouterError::NoController(_, channel) => ClientError::new(ClientErrorKind::NoMatch).with_channel(&channel),
            RouterError::GuardRejected(channel) => ClientError::new(ClientErrorKind::AccessDenied).with_channel(&channel),
            RouterError::Validation(message) => ClientError::new(ClientErrorKind::Validation(message)),
            RouterError::Handler(message) => ClientError::new(ClientErrorKind::Internal(message)),
        }
    }
}
