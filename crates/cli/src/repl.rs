//! The command loop and the command set.

use netd_client::{ClientError, NetconfClient};
use netd_yang::message::{Commit, DefaultOperation, ErrorOption, TestOption};
use netd_yang::{xml, Datastore, Filter, Response};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

const HELP: &str = "\
commands:
  get [xpath]                     running config + state (optionally filtered)
  get-config <store>              read a datastore (running|candidate|startup)
  edit <store> <file.xml>         apply a <config> document to a datastore
  lock <store> | unlock <store>   datastore locks
  commit [confirmed [secs]]       promote candidate to running
  confirm <persist-id>            confirm a persisted confirmed commit
  discard                         reset candidate from running
  validate <store>                schema-check a datastore
  copy <source> <target>          replace target with source
  delete <store>                  empty a datastore (candidate|startup)
  schema <module> [revision]      fetch YANG source
  kill <session-id>               force-close another session
  quit";

pub async fn run(client: &NetconfClient, verbose: bool) -> anyhow::Result<()> {
    let mut editor = DefaultEditor::new()?;
    loop {
        match editor.readline("netcli> ") {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let _ = editor.add_history_entry(line);
                if matches!(line, "quit" | "exit" | "close") {
                    return Ok(());
                }
                if let Err(e) = execute(client, line, verbose).await {
                    report(e, verbose);
                }
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => return Ok(()),
            Err(e) => return Err(e.into()),
        }
    }
}

pub async fn run_one(client: &NetconfClient, line: &str, verbose: bool) -> anyhow::Result<()> {
    if let Err(e) = execute(client, line, verbose).await {
        report(e, verbose);
        std::process::exit(1);
    }
    Ok(())
}

fn report(err: ClientError, verbose: bool) {
    eprintln!("error: {err}");
    if verbose {
        let mut source = std::error::Error::source(&err);
        while let Some(cause) = source {
            eprintln!("  caused by: {cause}");
            source = cause.source();
        }
    }
}

fn parse_store(token: Option<&str>) -> Result<Datastore, String> {
    match token {
        Some("running") => Ok(Datastore::Running),
        Some("candidate") => Ok(Datastore::Candidate),
        Some("startup") => Ok(Datastore::Startup),
        Some(other) => Err(format!("unknown datastore `{other}`")),
        None => Err("expected a datastore (running|candidate|startup)".into()),
    }
}

async fn execute(client: &NetconfClient, line: &str, verbose: bool) -> Result<(), ClientError> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    let response = match tokens.as_slice() {
        ["help"] => {
            println!("{HELP}");
            return Ok(());
        }
        ["get"] => client.get(None).await?,
        ["get", select] => client.get(Some(Filter::XPath(select.to_string()))).await?,
        ["get-config", rest @ ..] => {
            let store = match parse_store(rest.first().copied()) {
                Ok(store) => store,
                Err(msg) => return usage(&msg),
            };
            client.get_config(store, None).await?
        }
        ["edit", store, file] => {
            let store = match parse_store(Some(*store)) {
                Ok(store) => store,
                Err(msg) => return usage(&msg),
            };
            let bytes = match std::fs::read(file) {
                Ok(bytes) => bytes,
                Err(e) => return usage(&format!("{file}: {e}")),
            };
            let config = match xml::parse(&bytes) {
                Ok(tree) if tree.name == "config" => tree,
                Ok(tree) => return usage(&format!("{file}: expected <config>, found <{}>", tree.name)),
                Err(e) => return usage(&format!("{file}: {e}")),
            };
            client
                .edit_config(
                    store,
                    config,
                    DefaultOperation::Merge,
                    ErrorOption::RollbackOnError,
                    TestOption::TestThenSet,
                )
                .await?
        }
        ["lock", store] => match parse_store(Some(*store)) {
            Ok(store) => client.lock(store).await?,
            Err(msg) => return usage(&msg),
        },
        ["unlock", store] => match parse_store(Some(*store)) {
            Ok(store) => client.unlock(store).await?,
            Err(msg) => return usage(&msg),
        },
        ["commit"] => client.commit(Commit::default()).await?,
        ["commit", "confirmed", rest @ ..] => {
            let confirm_timeout = match rest.first() {
                Some(raw) => match raw.parse::<u64>() {
                    Ok(secs) => Some(secs),
                    Err(_) => return usage(&format!("bad timeout `{raw}`")),
                },
                None => None,
            };
            // A persist token lets the confirm come from a new session
            // if this one drops.
            let persist = uuid::Uuid::new_v4().to_string();
            println!("persist-id: {persist}");
            client
                .commit(Commit {
                    confirmed: true,
                    confirm_timeout,
                    persist: Some(persist),
                    persist_id: None,
                })
                .await?
        }
        ["confirm", persist_id] => {
            client
                .commit(Commit {
                    confirmed: false,
                    confirm_timeout: None,
                    persist: None,
                    persist_id: Some(persist_id.to_string()),
                })
                .await?
        }
        ["discard"] => client.discard_changes().await?,
        ["validate", store] => match parse_store(Some(*store)) {
            Ok(store) => client.validate(store).await?,
            Err(msg) => return usage(&msg),
        },
        ["copy", source, target] => {
            let source = match parse_store(Some(*source)) {
                Ok(store) => store,
                Err(msg) => return usage(&msg),
            };
            let target = match parse_store(Some(*target)) {
                Ok(store) => store,
                Err(msg) => return usage(&msg),
            };
            client.copy_config(source, target).await?
        }
        ["delete", store] => match parse_store(Some(*store)) {
            Ok(store) => client.delete_config(store).await?,
            Err(msg) => return usage(&msg),
        },
        ["schema", module, rest @ ..] => {
            client.get_schema(module, rest.first().copied()).await?
        }
        ["kill", raw] => match raw.parse::<u32>() {
            Ok(session_id) => client.kill_session(session_id).await?,
            Err(_) => return usage(&format!("bad session id `{raw}`")),
        },
        _ => return usage("unknown command (try `help`)"),
    };

    render(response, verbose);
    Ok(())
}

/// Command-line mistakes are not protocol errors; print and carry on.
fn usage(message: &str) -> Result<(), ClientError> {
    eprintln!("usage: {message}");
    Ok(())
}

fn render(response: Response, verbose: bool) {
    match response {
        Response::Ok => println!("ok"),
        Response::Data(data) => match data.value {
            // Schema text arrives as one text payload.
            Some(text) => println!("{text}"),
            None => {
                let bytes = xml::serialize(&data);
                println!("{}", String::from_utf8_lossy(&bytes));
            }
        },
        Response::Errors(errors) => {
            for err in &errors {
                eprintln!("rpc-error: {err}");
                if verbose {
                    for (name, value) in &err.info {
                        eprintln!("  {name}: {value}");
                    }
                }
            }
        }
    }
}
