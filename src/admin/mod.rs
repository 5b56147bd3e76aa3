//! Local admin endpoint: a line-delimited TCP text protocol, interactive
//! or batch depending on how quickly the client talks first.

mod history;
mod tokenize;

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::defaults::ADMIN_INTERACTIVE_PROBE_MS;
use crate::notify::NotifySender;
use crate::router::{Message, MessageType, Router};
use crate::value::{Record, Value};
use history::ClientHistory;
use tokenize::tokenize;

const BANNER_SOURCE: &str = "local-admin";

/// Verbs recognised only by the admin shell, in addition to the router's
/// own dispatch table.
const EXTRA_VERBS: [&str; 3] = ["test", "retry", "history"];

fn verb_to_message_type(verb: &str) -> Option<MessageType> {
    Some(match verb {
        "status" => MessageType::Status,
        "update" => MessageType::Update,
        "schedule" => MessageType::Schedule,
        "config" => MessageType::Config,
        "enable" => MessageType::Enable,
        "disable" => MessageType::Disable,
        "start" => MessageType::Start,
        "stop" => MessageType::Stop,
        "list" => MessageType::List,
        "help" => MessageType::Help,
        "exec" => MessageType::Exec,
        "shutdown" => MessageType::Shutdown,
        "ruleset" => MessageType::Ruleset,
        "name" => MessageType::Name,
        _ => return None,
    })
}

/// Splits tokens after the verb into a target (first bare token, if any)
/// and `key=value` parameters; remaining bare tokens collect under `args`.
fn tokens_to_parameters(tokens: &[String]) -> Record {
    let mut params = Record::new();
    let mut args = Vec::new();
    let mut target_set = false;
    for tok in tokens {
        if let Some((k, v)) = tok.split_once('=') {
            params.insert(k.to_string(), Value::parse_int_or_self(v));
        } else if !target_set {
            params.insert("target".to_string(), Value::String(tok.clone()));
            target_set = true;
        } else {
            args.push(Value::String(tok.clone()));
        }
    }
    if !args.is_empty() {
        params.insert("args".to_string(), Value::List(args));
    }
    params
}

/// Accepts connections until `cancel` fires; each connection runs on its
/// own task.
pub async fn run(
    listener: TcpListener,
    router: Arc<Router>,
    notify: NotifySender,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("admin endpoint shutting down");
                return;
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, addr)) => {
                        let router = router.clone();
                        let notify = notify.clone();
                        let cancel = cancel.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_client(stream, addr, router, notify, cancel).await {
                                warn!(%addr, error = %e, "admin client session ended with error");
                            }
                        });
                    }
                    Err(e) => warn!(error = %e, "admin accept failed"),
                }
            }
        }
    }
}

async fn handle_client(
    stream: TcpStream,
    addr: SocketAddr,
    router: Arc<Router>,
    notify: NotifySender,
    cancel: CancellationToken,
) -> std::io::Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();
    let mut history = ClientHistory::new();

    // Probe: if the client sends a line within the window without waiting
    // for a banner, treat it as a non-interactive batch client.
    let first_line = tokio::time::timeout(
        Duration::from_millis(ADMIN_INTERACTIVE_PROBE_MS),
        lines.next_line(),
    )
    .await;

    let (interactive, mut pending) = match first_line {
        Ok(Ok(Some(line))) => (false, Some(line)),
        Ok(Ok(None)) => return Ok(()),
        Ok(Err(e)) => return Err(e),
        Err(_) => (true, None),
    };

    let local_id = router.settings.get().id.clone();
    if interactive {
        write_half
            .write_all(format!("RIO-Agent admin shell ({local_id})\r\n{local_id}> ").as_bytes())
            .await?;
    }

    let mut notify_rx = notify.subscribe();
    loop {
        let line = if let Some(line) = pending.take() {
            Some(line)
        } else {
            tokio::select! {
                _ = cancel.cancelled() => None,
                event = notify_rx.recv() => {
                    match event {
                        Ok(ev) if interactive => {
                            write_half.write_all(format!("{}\r\n", ev.render()).as_bytes()).await?;
                            continue;
                        }
                        _ => continue,
                    }
                }
                next = lines.next_line() => next?,
            }
        };

        let Some(raw) = line else {
            return Ok(());
        };
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            if interactive {
                write_half.write_all(format!("{local_id}> ").as_bytes()).await?;
            }
            continue;
        }
        if trimmed == "bye" || trimmed.contains('\u{4}') {
            if interactive {
                write_half.write_all(b"goodbye\r\n").await?;
            }
            return Ok(());
        }

        let resolved = history.resolve_recall(trimmed);
        let resolved = resolved.unwrap_or_else(|| trimmed.to_string());
        history.push(resolved.clone());

        let tokens = tokenize(&resolved);
        let reply = dispatch_line(&tokens, &history, &router).await;

        if interactive {
            write_half
                .write_all(format!("{reply}\r\n{local_id}> ").as_bytes())
                .await?;
        } else {
            let json = serde_json::to_string(&reply_record(&reply)).unwrap_or_default();
            write_half.write_all(format!("{json}\n").as_bytes()).await?;
        }
    }
}

fn reply_record(text: &str) -> BTreeMap<String, Value> {
    BTreeMap::from([("reply".to_string(), Value::String(text.to_string()))])
}

async fn dispatch_line(tokens: &[String], history: &ClientHistory, router: &Router) -> String {
    let Some(verb) = tokens.first() else {
        return "empty command".to_string();
    };

    if EXTRA_VERBS.contains(&verb.as_str()) {
        return match verb.as_str() {
            "history" => {
                let filter = tokens.get(1).map(String::as_str);
                history.rendered(filter)
            }
            "test" => "ok".to_string(),
            "retry" => "retry requested".to_string(),
            _ => unreachable!(),
        };
    }

    let Some(type_) = verb_to_message_type(verb) else {
        return format!("unrecognized command '{verb}'");
    };
    let parameters = tokens_to_parameters(&tokens[1..]);
    let request = Message::request(type_, BANNER_SOURCE, parameters);
    let response = router.dispatch(&request).await;
    format!("{:?}", response.parameters)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_to_parameters_splits_target_and_kv() {
        let tokens = vec!["Mail".to_string(), "count=3".to_string(), "loose".to_string()];
        let params = tokens_to_parameters(&tokens);
        assert_eq!(params.get("target"), Some(&Value::String("Mail".into())));
        assert_eq!(params.get("count"), Some(&Value::Int(3)));
        assert_eq!(params.get("args"), Some(&Value::List(vec![Value::String("loose".into())])));
    }

    #[test]
    fn verb_lookup_covers_router_vocabulary() {
        assert!(verb_to_message_type("status").is_some());
        assert!(verb_to_message_type("bogus").is_none());
    }
}
