//! Typed NETCONF messages on top of generic trees.
//!
//! Three top-level shapes cross the wire: `hello`, `rpc`, `rpc-reply`.
//! Envelopes are classified first (`Message::parse`); operation bodies
//! are lifted into `Request` / `Response` afterwards, so a bad body can
//! still be answered with an `rpc-error` carrying the recovered
//! message-id.

use std::fmt;

use netd_domain::CapabilitySet;

use crate::tree::DataNode;
use crate::validate;
use crate::xml::{self, CodecError};
use crate::{SchemaRegistry, MONITORING_NS, NETCONF_NS};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Envelope classification
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Hello(Hello),
    Rpc {
        message_id: String,
        envelope: DataNode,
    },
    Reply {
        message_id: String,
        envelope: DataNode,
    },
}

impl Message {
    /// Parse raw XML and classify the envelope. An `rpc` without a
    /// `message-id` is unanswerable and therefore malformed.
    pub fn parse(input: &[u8]) -> Result<Message, CodecError> {
        let tree = xml::parse(input)?;
        match tree.name.as_str() {
            "hello" => Ok(Message::Hello(Hello::from_tree(&tree)?)),
            "rpc" => {
                let message_id = tree
                    .attr("message-id")
                    .ok_or_else(|| CodecError::Malformed("rpc without message-id".into()))?
                    .to_string();
                Ok(Message::Rpc {
                    message_id,
                    envelope: tree,
                })
            }
            "rpc-reply" => {
                let message_id = tree
                    .attr("message-id")
                    .ok_or_else(|| CodecError::Malformed("rpc-reply without message-id".into()))?
                    .to_string();
                Ok(Message::Reply {
                    message_id,
                    envelope: tree,
                })
            }
            other => Err(CodecError::Malformed(format!(
                "unknown top-level element <{other}>"
            ))),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Hello
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hello {
    pub capabilities: CapabilitySet,
    /// Present only in the server's hello.
    pub session_id: Option<u32>,
}

impl Hello {
    pub fn new(capabilities: CapabilitySet) -> Self {
        Hello {
            capabilities,
            session_id: None,
        }
    }

    pub fn with_session_id(mut self, id: u32) -> Self {
        self.session_id = Some(id);
        self
    }

    fn from_tree(tree: &DataNode) -> Result<Hello, CodecError> {
        let caps_node = tree
            .child("capabilities")
            .ok_or_else(|| CodecError::Malformed("hello without capabilities".into()))?;
        let capabilities: CapabilitySet = caps_node
            .children_named("capability")
            .filter_map(|c| c.value.clone())
            .collect();
        if capabilities.is_empty() {
            return Err(CodecError::Malformed("hello with empty capabilities".into()));
        }
        let session_id = match tree.child_value("session-id") {
            Some(raw) => Some(raw.parse::<u32>().ok().filter(|id| *id > 0).ok_or_else(
                || CodecError::Malformed(format!("bad session-id `{raw}` in hello")),
            )?),
            None => None,
        };
        Ok(Hello {
            capabilities,
            session_id,
        })
    }

    pub fn to_tree(&self) -> DataNode {
        let mut caps = DataNode::container("capabilities");
        for uri in self.capabilities.iter() {
            caps.push(DataNode::leaf("capability", uri));
        }
        let mut hello = DataNode::container("hello")
            .with_namespace(NETCONF_NS)
            .with_child(caps);
        if let Some(id) = self.session_id {
            hello.push(DataNode::leaf("session-id", id.to_string()));
        }
        hello
    }

    pub fn to_xml(&self) -> Vec<u8> {
        xml::serialize(&self.to_tree())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Requests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Datastore {
    Running,
    Candidate,
    Startup,
}

impl Datastore {
    pub fn as_str(&self) -> &'static str {
        match self {
            Datastore::Running => "running",
            Datastore::Candidate => "candidate",
            Datastore::Startup => "startup",
        }
    }

    fn from_container(node: &DataNode, what: &str) -> Result<Datastore, RpcError> {
        let inner = node
            .children
            .first()
            .ok_or_else(|| RpcError::missing_element(what))?;
        match inner.name.as_str() {
            "running" => Ok(Datastore::Running),
            "candidate" => Ok(Datastore::Candidate),
            "startup" => Ok(Datastore::Startup),
            other => Err(RpcError::new(ErrorType::Protocol, ErrorTag::InvalidValue)
                .with_message(format!("unknown datastore <{other}>"))),
        }
    }

    fn to_container(self, name: &str) -> DataNode {
        DataNode::container(name).with_child(DataNode::empty(self.as_str()))
    }
}

impl fmt::Display for Datastore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DefaultOperation {
    #[default]
    Merge,
    Replace,
    None,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ErrorOption {
    #[default]
    StopOnError,
    ContinueOnError,
    RollbackOnError,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TestOption {
    #[default]
    TestThenSet,
    Set,
    TestOnly,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EditConfig {
    pub target: Datastore,
    /// The `<config>` element; its children are the edit forest.
    pub config: DataNode,
    pub default_operation: DefaultOperation,
    pub error_option: ErrorOption,
    pub test_option: TestOption,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Commit {
    pub confirmed: bool,
    pub confirm_timeout: Option<u64>,
    pub persist: Option<String>,
    pub persist_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// The `<filter>` element; children form the match forest.
    Subtree(DataNode),
    XPath(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    Get {
        filter: Option<Filter>,
    },
    GetConfig {
        source: Datastore,
        filter: Option<Filter>,
    },
    EditConfig(EditConfig),
    CopyConfig {
        source: Datastore,
        target: Datastore,
    },
    DeleteConfig {
        target: Datastore,
    },
    Lock {
        target: Datastore,
    },
    Unlock {
        target: Datastore,
    },
    Commit(Commit),
    DiscardChanges,
    Validate {
        source: Datastore,
    },
    CloseSession,
    KillSession {
        session_id: u32,
    },
    GetSchema {
        identifier: String,
        version: Option<String>,
        format: Option<String>,
    },
}

impl Request {
    /// Operation name as it appears on the wire.
    pub fn operation_name(&self) -> &'static str {
        match self {
            Request::Get { .. } => "get",
            Request::GetConfig { .. } => "get-config",
            Request::EditConfig(_) => "edit-config",
            Request::CopyConfig { .. } => "copy-config",
            Request::DeleteConfig { .. } => "delete-config",
            Request::Lock { .. } => "lock",
            Request::Unlock { .. } => "unlock",
            Request::Commit(_) => "commit",
            Request::DiscardChanges => "discard-changes",
            Request::Validate { .. } => "validate",
            Request::CloseSession => "close-session",
            Request::KillSession { .. } => "kill-session",
            Request::GetSchema { .. } => "get-schema",
        }
    }

    /// Lift the operation out of a classified `<rpc>` envelope. Bodies
    /// are validated against the registry on the way in.
    pub fn from_envelope(
        envelope: &DataNode,
        registry: &SchemaRegistry,
    ) -> Result<Request, RpcError> {
        let mut ops = envelope.children.iter();
        let op = ops.next().ok_or_else(|| RpcError::missing_element("rpc"))?;
        if ops.next().is_some() {
            return Err(RpcError::new(ErrorType::Protocol, ErrorTag::BadElement)
                .with_message("rpc must carry exactly one operation"));
        }

        match op.name.as_str() {
            "get" => Ok(Request::Get {
                filter: parse_filter(op)?,
            }),
            "get-config" => {
                let source = op
                    .child("source")
                    .map(|s| Datastore::from_container(s, "source"))
                    .transpose()?
                    .ok_or_else(|| RpcError::missing_element("source"))?;
                Ok(Request::GetConfig {
                    source,
                    filter: parse_filter(op)?,
                })
            }
            "edit-config" => parse_edit_config(op, registry).map(Request::EditConfig),
            "copy-config" => {
                let source = op
                    .child("source")
                    .map(|s| Datastore::from_container(s, "source"))
                    .transpose()?
                    .ok_or_else(|| RpcError::missing_element("source"))?;
                let target = op
                    .child("target")
                    .map(|t| Datastore::from_container(t, "target"))
                    .transpose()?
                    .ok_or_else(|| RpcError::missing_element("target"))?;
                Ok(Request::CopyConfig { source, target })
            }
            "delete-config" => Ok(Request::DeleteConfig {
                target: require_target(op)?,
            }),
            "lock" => Ok(Request::Lock {
                target: require_target(op)?,
            }),
            "unlock" => Ok(Request::Unlock {
                target: require_target(op)?,
            }),
            "commit" => parse_commit(op).map(Request::Commit),
            "discard-changes" => Ok(Request::DiscardChanges),
            "validate" => {
                let source = op
                    .child("source")
                    .map(|s| Datastore::from_container(s, "source"))
                    .transpose()?
                    .ok_or_else(|| RpcError::missing_element("source"))?;
                Ok(Request::Validate { source })
            }
            "close-session" => Ok(Request::CloseSession),
            "kill-session" => {
                let raw = op
                    .child_value("session-id")
                    .ok_or_else(|| RpcError::missing_element("session-id"))?;
                let session_id = raw.parse::<u32>().ok().filter(|id| *id > 0).ok_or_else(|| {
                    RpcError::new(ErrorType::Protocol, ErrorTag::InvalidValue)
                        .with_message(format!("bad session-id `{raw}`"))
                })?;
                Ok(Request::KillSession { session_id })
            }
            "get-schema" => {
                let identifier = op
                    .child_value("identifier")
                    .ok_or_else(|| RpcError::missing_element("identifier"))?
                    .to_string();
                Ok(Request::GetSchema {
                    identifier,
                    version: op.child_value("version").map(str::to_string),
                    format: op.child_value("format").map(str::to_string),
                })
            }
            other => Err(RpcError::new(
                ErrorType::Protocol,
                ErrorTag::OperationNotSupported,
            )
            .with_message(format!("unsupported operation <{other}>"))),
        }
    }

    /// Build the `<rpc>` envelope for this request.
    pub fn to_envelope(&self, message_id: &str) -> DataNode {
        let op = self.to_operation();
        DataNode::container("rpc")
            .with_namespace(NETCONF_NS)
            .with_attr("message-id", message_id)
            .with_child(op)
    }

    fn to_operation(&self) -> DataNode {
        match self {
            Request::Get { filter } => {
                let mut op = DataNode::container("get");
                if let Some(f) = filter {
                    op.push(f.to_tree());
                }
                op
            }
            Request::GetConfig { source, filter } => {
                let mut op = DataNode::container("get-config").with_child(
                    source.to_container("source"),
                );
                if let Some(f) = filter {
                    op.push(f.to_tree());
                }
                op
            }
            Request::EditConfig(edit) => {
                let mut op = DataNode::container("edit-config")
                    .with_child(edit.target.to_container("target"));
                match edit.default_operation {
                    DefaultOperation::Merge => {}
                    DefaultOperation::Replace => {
                        op.push(DataNode::leaf("default-operation", "replace"))
                    }
                    DefaultOperation::None => op.push(DataNode::leaf("default-operation", "none")),
                }
                match edit.test_option {
                    TestOption::TestThenSet => {}
                    TestOption::Set => op.push(DataNode::leaf("test-option", "set")),
                    TestOption::TestOnly => op.push(DataNode::leaf("test-option", "test-only")),
                }
                match edit.error_option {
                    ErrorOption::StopOnError => {}
                    ErrorOption::ContinueOnError => {
                        op.push(DataNode::leaf("error-option", "continue-on-error"))
                    }
                    ErrorOption::RollbackOnError => {
                        op.push(DataNode::leaf("error-option", "rollback-on-error"))
                    }
                }
                op.push(edit.config.clone());
                op
            }
            Request::CopyConfig { source, target } => DataNode::container("copy-config")
                .with_child(target.to_container("target"))
                .with_child(source.to_container("source")),
            Request::DeleteConfig { target } => {
                DataNode::container("delete-config").with_child(target.to_container("target"))
            }
            Request::Lock { target } => {
                DataNode::container("lock").with_child(target.to_container("target"))
            }
            Request::Unlock { target } => {
                DataNode::container("unlock").with_child(target.to_container("target"))
            }
            Request::Commit(commit) => {
                let mut op = DataNode::container("commit");
                if commit.confirmed {
                    op.push(DataNode::empty("confirmed"));
                }
                if let Some(t) = commit.confirm_timeout {
                    op.push(DataNode::leaf("confirm-timeout", t.to_string()));
                }
                if let Some(p) = &commit.persist {
                    op.push(DataNode::leaf("persist", p));
                }
                if let Some(p) = &commit.persist_id {
                    op.push(DataNode::leaf("persist-id", p));
                }
                op
            }
            Request::DiscardChanges => DataNode::empty("discard-changes"),
            Request::Validate { source } => {
                DataNode::container("validate").with_child(source.to_container("source"))
            }
            Request::CloseSession => DataNode::empty("close-session"),
            Request::KillSession { session_id } => DataNode::container("kill-session")
                .with_child(DataNode::leaf("session-id", session_id.to_string())),
            Request::GetSchema {
                identifier,
                version,
                format,
            } => {
                let mut op = DataNode::container("get-schema")
                    .with_namespace(MONITORING_NS)
                    .with_child(DataNode::leaf("identifier", identifier));
                if let Some(v) = version {
                    op.push(DataNode::leaf("version", v));
                }
                if let Some(f) = format {
                    op.push(DataNode::leaf("format", f));
                }
                op
            }
        }
    }
}

fn require_target(op: &DataNode) -> Result<Datastore, RpcError> {
    op.child("target")
        .map(|t| Datastore::from_container(t, "target"))
        .transpose()?
        .ok_or_else(|| RpcError::missing_element("target"))
}

fn parse_filter(op: &DataNode) -> Result<Option<Filter>, RpcError> {
    let Some(node) = op.child("filter") else {
        return Ok(None);
    };
    match node.attr("type").unwrap_or("subtree") {
        "subtree" => Ok(Some(Filter::Subtree(node.clone()))),
        "xpath" => {
            let select = node.attr("select").ok_or_else(|| {
                RpcError::new(ErrorType::Protocol, ErrorTag::MissingAttribute)
                    .with_message("xpath filter without select attribute")
            })?;
            Ok(Some(Filter::XPath(select.to_string())))
        }
        other => Err(
            RpcError::new(ErrorType::Protocol, ErrorTag::BadAttribute)
                .with_message(format!("unknown filter type `{other}`")),
        ),
    }
}

fn parse_commit(op: &DataNode) -> Result<Commit, RpcError> {
    let confirmed = op.child("confirmed").is_some();
    let confirm_timeout = match op.child_value("confirm-timeout") {
        Some(raw) => Some(raw.parse::<u64>().ok().filter(|t| *t > 0).ok_or_else(|| {
            RpcError::new(ErrorType::Protocol, ErrorTag::InvalidValue)
                .with_message(format!("bad confirm-timeout `{raw}`"))
        })?),
        None => None,
    };
    if confirm_timeout.is_some() && !confirmed {
        return Err(RpcError::new(ErrorType::Protocol, ErrorTag::BadElement)
            .with_message("confirm-timeout without confirmed"));
    }
    Ok(Commit {
        confirmed,
        confirm_timeout,
        persist: op.child_value("persist").map(str::to_string),
        persist_id: op.child_value("persist-id").map(str::to_string),
    })
}

fn parse_edit_config(op: &DataNode, registry: &SchemaRegistry) -> Result<EditConfig, RpcError> {
    let target = require_target(op)?;
    let config = op
        .child("config")
        .ok_or_else(|| RpcError::missing_element("config"))?
        .clone();

    let default_operation = match op.child_value("default-operation") {
        None | Some("merge") => DefaultOperation::Merge,
        Some("replace") => DefaultOperation::Replace,
        Some("none") => DefaultOperation::None,
        Some(other) => {
            return Err(RpcError::new(ErrorType::Protocol, ErrorTag::InvalidValue)
                .with_message(format!("bad default-operation `{other}`")))
        }
    };
    let test_option = match op.child_value("test-option") {
        None | Some("test-then-set") => TestOption::TestThenSet,
        Some("set") => TestOption::Set,
        Some("test-only") => TestOption::TestOnly,
        Some(other) => {
            return Err(RpcError::new(ErrorType::Protocol, ErrorTag::InvalidValue)
                .with_message(format!("bad test-option `{other}`")))
        }
    };
    let error_option = match op.child_value("error-option") {
        None | Some("stop-on-error") => ErrorOption::StopOnError,
        Some("continue-on-error") => ErrorOption::ContinueOnError,
        Some("rollback-on-error") => ErrorOption::RollbackOnError,
        Some(other) => {
            return Err(RpcError::new(ErrorType::Protocol, ErrorTag::InvalidValue)
                .with_message(format!("bad error-option `{other}`")))
        }
    };

    // Strict ingress validation of the edit forest.
    validate::validate_config_forest(&config.children, registry)?;

    Ok(EditConfig {
        target,
        config,
        default_operation,
        error_option,
        test_option,
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Responses
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    Ok,
    /// The `<data>` element; children are the result forest.
    Data(DataNode),
    Errors(Vec<RpcError>),
}

impl Response {
    pub fn error(err: RpcError) -> Self {
        Response::Errors(vec![err])
    }

    pub fn is_ok(&self) -> bool {
        !matches!(self, Response::Errors(_))
    }

    /// Lift a classified `<rpc-reply>` envelope.
    pub fn from_envelope(envelope: &DataNode) -> Result<Response, CodecError> {
        let errors: Vec<RpcError> = envelope
            .children_named("rpc-error")
            .map(RpcError::from_tree)
            .collect::<Result<_, _>>()?;
        if !errors.is_empty() {
            return Ok(Response::Errors(errors));
        }
        if let Some(data) = envelope.child("data") {
            return Ok(Response::Data(data.clone()));
        }
        if envelope.child("ok").is_some() {
            return Ok(Response::Ok);
        }
        Err(CodecError::Malformed(
            "rpc-reply carries neither ok, data nor rpc-error".into(),
        ))
    }

    /// Build the `<rpc-reply>` envelope echoing the request's id.
    pub fn to_envelope(&self, message_id: &str) -> DataNode {
        let mut reply = DataNode::container("rpc-reply")
            .with_namespace(NETCONF_NS)
            .with_attr("message-id", message_id);
        match self {
            Response::Ok => reply.push(DataNode::empty("ok")),
            Response::Data(data) => {
                // Result forests inherit the envelope namespace; a
                // namespaced payload (get-schema) keeps its own.
                let mut node = data.clone();
                node.name = "data".into();
                node.attrs.clear();
                reply.push(node);
            }
            Response::Errors(errors) => {
                for err in errors {
                    reply.push(err.to_tree());
                }
            }
        }
        reply
    }

    pub fn to_xml(&self, message_id: &str) -> Vec<u8> {
        xml::serialize(&self.to_envelope(message_id))
    }
}

impl Filter {
    fn to_tree(&self) -> DataNode {
        match self {
            Filter::Subtree(node) => {
                let mut filter = node.clone();
                filter.name = "filter".into();
                filter.namespace = None;
                filter.attrs = vec![];
                filter.with_attr("type", "subtree")
            }
            Filter::XPath(select) => DataNode::empty("filter")
                .with_attr("type", "xpath")
                .with_attr("select", select),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// rpc-error
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorType {
    Transport,
    Rpc,
    Protocol,
    Application,
}

impl ErrorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorType::Transport => "transport",
            ErrorType::Rpc => "rpc",
            ErrorType::Protocol => "protocol",
            ErrorType::Application => "application",
        }
    }

    fn from_str(s: &str) -> Option<Self> {
        match s {
            "transport" => Some(ErrorType::Transport),
            "rpc" => Some(ErrorType::Rpc),
            "protocol" => Some(ErrorType::Protocol),
            "application" => Some(ErrorType::Application),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    Error,
    Warning,
}

impl ErrorSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorSeverity::Error => "error",
            ErrorSeverity::Warning => "warning",
        }
    }
}

macro_rules! error_tags {
    ($($variant:ident => $wire:literal),+ $(,)?) => {
        /// The standard NETCONF error-tag set (RFC 6241 Appendix A).
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub enum ErrorTag {
            $($variant),+
        }

        impl ErrorTag {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(ErrorTag::$variant => $wire),+
                }
            }

            pub fn from_str(s: &str) -> Option<Self> {
                match s {
                    $($wire => Some(ErrorTag::$variant),)+
                    _ => None,
                }
            }
        }
    };
}

error_tags! {
    InUse => "in-use",
    InvalidValue => "invalid-value",
    TooBig => "too-big",
    MissingAttribute => "missing-attribute",
    BadAttribute => "bad-attribute",
    UnknownAttribute => "unknown-attribute",
    MissingElement => "missing-element",
    BadElement => "bad-element",
    UnknownElement => "unknown-element",
    UnknownNamespace => "unknown-namespace",
    AccessDenied => "access-denied",
    LockDenied => "lock-denied",
    ResourceDenied => "resource-denied",
    RollbackFailed => "rollback-failed",
    DataExists => "data-exists",
    DataMissing => "data-missing",
    OperationNotSupported => "operation-not-supported",
    OperationFailed => "operation-failed",
    PartialOperation => "partial-operation",
    MalformedMessage => "malformed-message",
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcError {
    pub kind: ErrorType,
    pub tag: ErrorTag,
    pub severity: ErrorSeverity,
    pub app_tag: Option<String>,
    pub path: Option<String>,
    pub message: Option<String>,
    /// Structured detail rendered as `<error-info>` children.
    pub info: Vec<(String, String)>,
}

impl RpcError {
    pub fn new(kind: ErrorType, tag: ErrorTag) -> Self {
        RpcError {
            kind,
            tag,
            severity: ErrorSeverity::Error,
            app_tag: None,
            path: None,
            message: None,
            info: Vec::new(),
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_info(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.info.push((name.into(), value.into()));
        self
    }

    // ── common shapes ───────────────────────────────────────────────

    pub fn missing_element(name: &str) -> Self {
        RpcError::new(ErrorType::Protocol, ErrorTag::MissingElement)
            .with_message(format!("missing element <{name}>"))
            .with_info("bad-element", name)
    }

    pub fn data_exists(path: impl Into<String>) -> Self {
        RpcError::new(ErrorType::Application, ErrorTag::DataExists).with_path(path)
    }

    pub fn data_missing(path: impl Into<String>) -> Self {
        RpcError::new(ErrorType::Application, ErrorTag::DataMissing).with_path(path)
    }

    pub fn lock_denied(holder: u32) -> Self {
        RpcError::new(ErrorType::Protocol, ErrorTag::LockDenied)
            .with_message("datastore is locked by another session")
            .with_info("session-id", holder.to_string())
    }

    pub fn too_big() -> Self {
        RpcError::new(ErrorType::Rpc, ErrorTag::TooBig)
    }

    pub fn malformed_message() -> Self {
        RpcError::new(ErrorType::Rpc, ErrorTag::MalformedMessage)
    }

    pub fn operation_failed(message: impl Into<String>) -> Self {
        RpcError::new(ErrorType::Application, ErrorTag::OperationFailed).with_message(message)
    }

    pub fn operation_not_supported(message: impl Into<String>) -> Self {
        RpcError::new(ErrorType::Application, ErrorTag::OperationNotSupported)
            .with_message(message)
    }

    pub fn invalid_value(message: impl Into<String>) -> Self {
        RpcError::new(ErrorType::Application, ErrorTag::InvalidValue).with_message(message)
    }

    pub fn resource_denied(message: impl Into<String>) -> Self {
        RpcError::new(ErrorType::Application, ErrorTag::ResourceDenied).with_message(message)
    }

    // ── tree conversion ─────────────────────────────────────────────

    pub fn to_tree(&self) -> DataNode {
        let mut node = DataNode::container("rpc-error")
            .with_child(DataNode::leaf("error-type", self.kind.as_str()))
            .with_child(DataNode::leaf("error-tag", self.tag.as_str()))
            .with_child(DataNode::leaf("error-severity", self.severity.as_str()));
        if let Some(app_tag) = &self.app_tag {
            node.push(DataNode::leaf("error-app-tag", app_tag));
        }
        if let Some(path) = &self.path {
            node.push(DataNode::leaf("error-path", path));
        }
        if let Some(message) = &self.message {
            node.push(DataNode::leaf("error-message", message));
        }
        if !self.info.is_empty() {
            let mut info = DataNode::container("error-info");
            for (name, value) in &self.info {
                info.push(DataNode::leaf(name, value));
            }
            node.push(info);
        }
        node
    }

    pub fn from_tree(node: &DataNode) -> Result<RpcError, CodecError> {
        let kind = node
            .child_value("error-type")
            .and_then(ErrorType::from_str)
            .ok_or_else(|| CodecError::Malformed("rpc-error without error-type".into()))?;
        let tag = node
            .child_value("error-tag")
            .and_then(ErrorTag::from_str)
            .ok_or_else(|| CodecError::Malformed("rpc-error without error-tag".into()))?;
        let severity = match node.child_value("error-severity") {
            Some("warning") => ErrorSeverity::Warning,
            _ => ErrorSeverity::Error,
        };
        let info = node
            .child("error-info")
            .map(|i| {
                i.children
                    .iter()
                    .filter_map(|c| c.value.clone().map(|v| (c.name.clone(), v)))
                    .collect()
            })
            .unwrap_or_default();
        Ok(RpcError {
            kind,
            tag,
            severity,
            app_tag: node.child_value("error-app-tag").map(str::to_string),
            path: node.child_value("error-path").map(str::to_string),
            message: node.child_value("error-message").map(str::to_string),
            info,
        })
    }
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind.as_str(), self.tag.as_str())?;
        if let Some(message) = &self.message {
            write!(f, ": {message}")?;
        }
        if let Some(path) = &self.path {
            write!(f, " (at {path})")?;
        }
        Ok(())
    }
}

impl std::error::Error for RpcError {}
