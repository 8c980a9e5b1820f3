//! Server-side RPC dispatch.
//!
//! One handler per operation; each takes the calling session's view
//! (id + negotiated capabilities) and produces a `Response`. Thrown
//! `RpcError`s become `rpc-error` replies; the caller re-attaches the
//! request's message-id.

use netd_domain::Negotiated;
use netd_yang::message::{Commit, EditConfig};
use netd_yang::tree::DataNode;
use netd_yang::{filter, yanglib, Datastore, Filter, Request, Response, RpcError, MONITORING_NS};

use crate::state::ServerState;

/// What the session loop should do after sending the reply.
pub struct DispatchOutcome {
    pub response: Response,
    pub close: bool,
}

impl DispatchOutcome {
    fn reply(response: Response) -> Self {
        DispatchOutcome {
            response,
            close: false,
        }
    }
}

/// The calling session as the dispatcher sees it.
#[derive(Debug, Clone, Copy)]
pub struct Caller {
    pub session_id: u32,
    pub negotiated: Negotiated,
}

pub async fn handle(state: &ServerState, caller: Caller, request: Request) -> DispatchOutcome {
    let operation = request.operation_name();
    let result = dispatch(state, caller, request).await;
    match result {
        Ok(outcome) => outcome,
        Err(err) => {
            tracing::debug!(
                session_id = caller.session_id,
                operation,
                error = %err,
                "request failed"
            );
            DispatchOutcome::reply(Response::error(err))
        }
    }
}

async fn dispatch(
    state: &ServerState,
    caller: Caller,
    request: Request,
) -> Result<DispatchOutcome, RpcError> {
    match request {
        Request::Get { filter } => get(state, caller, filter).await.map(DispatchOutcome::reply),
        Request::GetConfig { source, filter } => {
            get_config(state, caller, source, filter).map(DispatchOutcome::reply)
        }
        Request::EditConfig(edit) => edit_config(state, caller, edit)
            .await
            .map(DispatchOutcome::reply),
        Request::CopyConfig { source, target } => copy_config(state, caller, source, target)
            .await
            .map(DispatchOutcome::reply),
        Request::DeleteConfig { target } => {
            require(caller.negotiated.startup || target != Datastore::Startup, "startup")?;
            state
                .stores
                .delete_config(caller.session_id, target)
                .map(DispatchOutcome::reply)
        }
        Request::Lock { target } => state
            .stores
            .lock(target, caller.session_id)
            .map(|()| DispatchOutcome::reply(Response::Ok)),
        Request::Unlock { target } => state
            .stores
            .unlock(target, caller.session_id)
            .map(|()| DispatchOutcome::reply(Response::Ok)),
        Request::Commit(commit) => commit_op(state, caller, commit)
            .await
            .map(DispatchOutcome::reply),
        Request::DiscardChanges => {
            require(caller.negotiated.candidate, "candidate")?;
            state
                .stores
                .discard_changes(caller.session_id)
                .map(DispatchOutcome::reply)
        }
        Request::Validate { source } => {
            require(caller.negotiated.validate, "validate")?;
            state.stores.validate_store(source).map(DispatchOutcome::reply)
        }
        Request::CloseSession => Ok(DispatchOutcome {
            response: Response::Ok,
            close: true,
        }),
        Request::KillSession { session_id } => {
            kill_session(state, caller, session_id).map(DispatchOutcome::reply)
        }
        Request::GetSchema {
            identifier,
            version,
            format,
        } => get_schema(state, &identifier, version.as_deref(), format.as_deref())
            .map(DispatchOutcome::reply),
    }
}

fn require(granted: bool, capability: &str) -> Result<(), RpcError> {
    if granted {
        Ok(())
    } else {
        Err(RpcError::operation_not_supported(format!(
            "the :{capability} capability was not negotiated on this session"
        )))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Reads
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn get(
    state: &ServerState,
    caller: Caller,
    filter_spec: Option<Filter>,
) -> Result<Response, RpcError> {
    if matches!(filter_spec, Some(Filter::XPath(_))) {
        require(caller.negotiated.xpath, "xpath")?;
    }

    // Running config, overlaid with backend state and the YANG library.
    let mut data = state.stores.snapshot(Datastore::Running);
    crate::backend::merge_operational(&mut data, state.backend.as_ref())
        .await
        .map_err(|e| RpcError::operation_failed(format!("backend enumeration failed: {e}")))?;
    data.push(yanglib::modules_state(&state.registry));

    let projected = filter::apply(&data, filter_spec.as_ref())?;
    Ok(Response::Data(projected))
}

fn get_config(
    state: &ServerState,
    caller: Caller,
    source: Datastore,
    filter_spec: Option<Filter>,
) -> Result<Response, RpcError> {
    if matches!(filter_spec, Some(Filter::XPath(_))) {
        require(caller.negotiated.xpath, "xpath")?;
    }
    if source == Datastore::Startup {
        require(caller.negotiated.startup, "startup")?;
    }
    let data = state.stores.snapshot(source);
    let projected = filter::apply(&data, filter_spec.as_ref())?;
    Ok(Response::Data(projected))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Writes
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn edit_config(
    state: &ServerState,
    caller: Caller,
    edit: EditConfig,
) -> Result<Response, RpcError> {
    match edit.target {
        Datastore::Candidate => require(caller.negotiated.candidate, "candidate")?,
        Datastore::Running => require(caller.negotiated.writable_running, "writable-running")?,
        Datastore::Startup => {}
    }
    if edit.error_option == netd_yang::message::ErrorOption::RollbackOnError {
        require(caller.negotiated.rollback_on_error, "rollback-on-error")?;
    }

    if edit.target == Datastore::Running {
        return edit_running(state, caller, edit).await;
    }
    state.stores.edit_config(caller.session_id, &edit)
}

/// Edits landing directly in running must reach the host too; a
/// backend refusal rolls the store back.
async fn edit_running(
    state: &ServerState,
    caller: Caller,
    edit: EditConfig,
) -> Result<Response, RpcError> {
    let pre = state.stores.snapshot(Datastore::Running);
    let response = state.stores.edit_config(caller.session_id, &edit)?;
    if !response.is_ok() || edit.test_option == netd_yang::message::TestOption::TestOnly {
        return Ok(response);
    }

    let new = state.stores.snapshot(Datastore::Running);
    if let Err(apply) = state.backend.apply_diff(&pre, &new).await {
        state.stores.publish(Datastore::Running, pre);
        return Err(RpcError::operation_failed("backend refused the edit")
            .with_info("reason", apply.reason));
    }
    Ok(response)
}

async fn copy_config(
    state: &ServerState,
    caller: Caller,
    source: Datastore,
    target: Datastore,
) -> Result<Response, RpcError> {
    if source == Datastore::Startup || target == Datastore::Startup {
        require(caller.negotiated.startup, "startup")?;
    }
    if target == Datastore::Running {
        require(caller.negotiated.writable_running, "writable-running")?;
        let pre = state.stores.snapshot(Datastore::Running);
        let response = state.stores.copy_config(caller.session_id, source, target)?;
        let new = state.stores.snapshot(Datastore::Running);
        if let Err(apply) = state.backend.apply_diff(&pre, &new).await {
            state.stores.publish(Datastore::Running, pre);
            return Err(RpcError::operation_failed("backend refused the copy")
                .with_info("reason", apply.reason));
        }
        return Ok(response);
    }
    state.stores.copy_config(caller.session_id, source, target)
}

async fn commit_op(
    state: &ServerState,
    caller: Caller,
    commit: Commit,
) -> Result<Response, RpcError> {
    require(caller.negotiated.candidate, "candidate")?;
    if commit.confirmed || commit.persist_id.is_some() {
        require(caller.negotiated.confirmed_commit, "confirmed-commit")?;
    }
    state
        .stores
        .commit(
            state.backend.clone(),
            caller.session_id,
            commit,
            state.confirm_timeout,
        )
        .await
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session management
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn kill_session(
    state: &ServerState,
    caller: Caller,
    target: u32,
) -> Result<Response, RpcError> {
    if target == caller.session_id {
        return Err(RpcError::invalid_value(
            "kill-session cannot target the calling session",
        ));
    }
    if state.sessions.kill(target) {
        Ok(Response::Ok)
    } else {
        Err(RpcError::invalid_value(format!("no session {target}")))
    }
}

fn get_schema(
    state: &ServerState,
    identifier: &str,
    version: Option<&str>,
    format: Option<&str>,
) -> Result<Response, RpcError> {
    match format {
        None | Some("yang") => {}
        Some(other) => {
            return Err(RpcError::invalid_value(format!(
                "unsupported schema format `{other}`"
            )))
        }
    }
    let source = state
        .registry
        .source_text(identifier, version)
        .map_err(|e| RpcError::invalid_value(e.to_string()))?;
    Ok(Response::Data(
        DataNode::leaf("data", source).with_namespace(MONITORING_NS),
    ))
}
