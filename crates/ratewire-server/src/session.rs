//! Per-connection client session.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch, OwnedSemaphorePermit};
use tracing::{debug, info};
use uuid::Uuid;

use crate::protocol::{self, Command, ProtocolError};
use crate::registry::SubscriptionRegistry;

/// Serve one accepted connection until the client disconnects, its
/// writes fail, or the server shuts down.
///
/// All outbound lines (responses and broadcast pushes) flow through one
/// bounded queue drained by a writer task, so a slow socket never blocks
/// the broadcast path; it fills its queue and is purged instead.
pub(crate) async fn run_session(
    socket: TcpStream,
    registry: Arc<SubscriptionRegistry>,
    known: Arc<HashSet<String>>,
    queue_depth: usize,
    mut shutdown: watch::Receiver<bool>,
    permit: OwnedSemaphorePermit,
) {
    let session = Uuid::new_v4();
    let peer = socket
        .peer_addr()
        .map(|addr| addr.to_string())
        .unwrap_or_else(|_| "<unknown>".to_owned());
    info!(%session, peer, "client connected");

    let (read_half, mut write_half) = socket.into_split();
    let (out_tx, mut out_rx) = mpsc::channel::<String>(queue_depth.max(1));
    let (kill_tx, mut kill_rx) = watch::channel(false);
    registry.register_session(session, out_tx.clone(), kill_tx);

    // Writer: drains the outbound queue; a failed write is the slow- or
    // dead-client signal and tears the session down.
    let writer_registry = Arc::clone(&registry);
    let writer = tokio::spawn(async move {
        while let Some(line) = out_rx.recv().await {
            let framed = format!("{line}\r\n");
            if write_half.write_all(framed.as_bytes()).await.is_err() {
                debug!(%session, "write failed, closing session");
                break;
            }
        }
        writer_registry.drop_session(session);
        let _ = write_half.shutdown().await;
    });

    let _ = out_tx.send(protocol::WELCOME.to_owned()).await;

    let mut reader = BufReader::new(read_half);
    let mut line = String::new();

    loop {
        line.clear();
        tokio::select! {
            read = reader.read_line(&mut line) => match read {
                Ok(0) => {
                    debug!(%session, "client closed the connection");
                    break;
                }
                Ok(_) => {
                    let reply = handle_line(&line, session, &registry, &known);
                    if out_tx.send(reply).await.is_err() {
                        break;
                    }
                }
                Err(error) => {
                    debug!(%session, %error, "read failed");
                    break;
                }
            },
            changed = kill_rx.changed() => {
                if changed.is_err() || *kill_rx.borrow() {
                    debug!(%session, "session killed by registry cleanup");
                    break;
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    registry.drop_session(session);
    // Dropping the last sender lets the writer drain pending lines and
    // exit.
    drop(out_tx);
    let _ = writer.await;
    drop(permit);
    info!(%session, peer, "client disconnected");
}

/// Dispatch one received line to a response line.
fn handle_line(
    line: &str,
    session: Uuid,
    registry: &SubscriptionRegistry,
    known: &HashSet<String>,
) -> String {
    match Command::parse(line) {
        Ok(Command::Subscribe(symbol)) => {
            if !known.contains(symbol.as_str()) {
                return ProtocolError::RateNotFound {
                    name: symbol.as_str().to_owned(),
                }
                .to_line();
            }
            registry.subscribe(symbol.as_str(), session);
            protocol::subscribed_line(&symbol)
        }
        Ok(Command::Unsubscribe(symbol)) => {
            if registry.unsubscribe(symbol.as_str(), session) {
                protocol::unsubscribed_line(&symbol)
            } else {
                ProtocolError::NotSubscribed {
                    name: symbol.as_str().to_owned(),
                }
                .to_line()
            }
        }
        Err(error) => error.to_line(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn known() -> HashSet<String> {
        ["EURUSD".to_owned(), "EURUSD-MARGIN".to_owned()].into()
    }

    #[test]
    fn subscribe_known_symbol_acknowledges() {
        let registry = SubscriptionRegistry::new();
        let session = Uuid::new_v4();

        let reply = handle_line("subscribe|EURUSD\r\n", session, &registry, &known());
        assert_eq!(reply, "Subscribed to EURUSD");
        assert_eq!(registry.subscriber_count("EURUSD"), 1);
    }

    #[test]
    fn subscribe_unknown_symbol_reports_rate_not_found() {
        let registry = SubscriptionRegistry::new();
        let reply = handle_line("subscribe|XAUXAG", Uuid::new_v4(), &registry, &known());
        assert_eq!(reply, "ERROR|Rate not found: XAUXAG");
    }

    #[test]
    fn unsubscribe_without_subscription_reports_error() {
        let registry = SubscriptionRegistry::new();
        let reply = handle_line("unsubscribe|EURUSD", Uuid::new_v4(), &registry, &known());
        assert_eq!(reply, "ERROR|You are not subscribed to: EURUSD");
    }

    #[test]
    fn malformed_line_reports_invalid_format() {
        let registry = SubscriptionRegistry::new();
        let reply = handle_line("gimme rates", Uuid::new_v4(), &registry, &known());
        assert_eq!(reply, "ERROR|Invalid request format");
    }

    #[test]
    fn derived_rate_names_are_subscribable() {
        let registry = SubscriptionRegistry::new();
        let reply = handle_line(
            "subscribe|EURUSD-MARGIN",
            Uuid::new_v4(),
            &registry,
            &known(),
        );
        assert_eq!(reply, "Subscribed to EURUSD-MARGIN");
    }
}
