use std::sync::Arc;

use anyhow::Result;
use chrono::Local;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, info, warn};

use super::registry::SessionId;
use super::ServerState;
use crate::protocol::{history_response, read_request, FrameKind, ProtocolError, Request, ACK};
use crate::store::{joined_line, left_line, message_line, renamed_line};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Departure {
    Gracefully,
    Badly,
}

/// Owns one accepted connection for its whole lifetime and answers its
/// requests in lockstep: every frame read gets exactly one response (except
/// `quit`) before the next frame is read.
pub struct Session<S> {
    id: SessionId,
    stream: BufReader<S>,
    state: Arc<ServerState>,
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// `id` must already be admitted in the registry.
    pub fn new(id: SessionId, stream: S, state: Arc<ServerState>) -> Self {
        Self {
            id,
            stream: BufReader::new(stream),
            state,
        }
    }

    /// Serves the connection until it ends. Connection problems end only this
    /// session; the returned error is a history failure that should stop the server.
    pub async fn run(mut self) -> Result<()> {
        loop {
            let req = match read_request(&mut self.stream).await {
                Ok(Some(req)) => req,
                Ok(None) => return self.close(Departure::Badly).await,
                Err(ProtocolError::UnknownTag(tag)) => {
                    warn!(session = self.id, %tag, "ignoring frame with unknown tag");
                    if self.reply(&[ACK]).await.is_err() {
                        return self.close(Departure::Badly).await;
                    }
                    continue;
                }
                Err(e) => {
                    debug!(session = self.id, error = %e, "read failed");
                    return self.close(Departure::Badly).await;
                }
            };

            let response = match req.kind {
                FrameKind::Hist => history_response(self.state.history.read_all().await?),
                FrameKind::Quit => return self.close(Departure::Gracefully).await,
                FrameKind::Name => {
                    self.set_name(req.line().to_vec()).await?;
                    vec![ACK]
                }
                FrameKind::Text => {
                    self.post(&req).await?;
                    vec![ACK]
                }
            };

            if self.reply(&response).await.is_err() {
                return self.close(Departure::Badly).await;
            }
        }
    }

    async fn reply(&mut self, data: &[u8]) -> std::io::Result<()> {
        let conn = self.stream.get_mut();
        conn.write_all(data).await?;
        conn.flush().await
    }

    async fn set_name(&self, name: Vec<u8>) -> Result<()> {
        debug!(session = self.id, name = %String::from_utf8_lossy(&name), "name request");
        let prior = self
            .state
            .registry
            .lock()
            .await
            .rename(self.id, name.clone());
        let line = match prior {
            Some(old) => renamed_line(&old, &name),
            None => joined_line(&name),
        };
        self.state.history.append(&line).await
    }

    async fn post(&self, req: &Request) -> Result<()> {
        let name = self
            .state
            .registry
            .lock()
            .await
            .name_of(self.id)
            .unwrap_or_default()
            .to_vec();
        debug!(session = self.id, name = %String::from_utf8_lossy(&name), "message request");
        self.state
            .history
            .append(&message_line(&Local::now(), &name, &req.payload))
            .await
    }

    async fn close(self, how: Departure) -> Result<()> {
        let (name, live) = {
            let mut registry = self.state.registry.lock().await;
            let name = registry.depart(self.id).unwrap_or_default();
            (name, registry.live())
        };
        let shown = String::from_utf8_lossy(&name);
        match how {
            Departure::Gracefully => info!(session = self.id, live, "{} disconnected gracefully", shown),
            Departure::Badly => info!(session = self.id, live, "{} disconnected badly", shown),
        }
        self.state.history.append(&left_line(&name)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::read_response;
    use tempfile::TempDir;
    use tokio::io::{duplex, DuplexStream};
    use tokio::task::JoinHandle;

    struct Harness {
        state: Arc<ServerState>,
        conn: BufReader<DuplexStream>,
        task: JoinHandle<Result<()>>,
        _dir: TempDir,
    }

    async fn start_session() -> Harness {
        let dir = TempDir::new().unwrap();
        let state = Arc::new(ServerState::new(dir.path().join("history.txt")));
        start_session_on(state, dir).await
    }

    async fn start_session_on(state: Arc<ServerState>, dir: TempDir) -> Harness {
        let id = state.registry.lock().await.admit();
        let (client, server) = duplex(4096);
        let task = tokio::spawn(Session::new(id, server, state.clone()).run());
        Harness {
            state,
            conn: BufReader::new(client),
            task,
            _dir: dir,
        }
    }

    impl Harness {
        async fn send(&mut self, req: Request) -> Vec<u8> {
            self.send_raw(&req.encode()).await
        }

        async fn send_raw(&mut self, data: &[u8]) -> Vec<u8> {
            self.conn.get_mut().write_all(data).await.unwrap();
            read_response(&mut self.conn).await.unwrap()
        }

        async fn history(&self) -> String {
            String::from_utf8(self.history_bytes().await).unwrap()
        }

        async fn history_bytes(&self) -> Vec<u8> {
            self.state.history.read_all().await.unwrap()
        }
    }

    #[tokio::test]
    async fn text_before_name_logs_empty_name() {
        let mut h = start_session().await;

        let resp = h.send(Request::new(FrameKind::Text, b"hello")).await;
        assert!(resp.is_empty());

        let history = h.history().await;
        let (stamp, rest) = history.split_at("[2024-01-01][00:00:00]".len());
        assert_eq!(rest, "[]: hello\n");
        let date = &stamp[1..11];
        assert!(chrono::NaiveDate::parse_from_str(date, "%Y-%m-%d").is_ok());
        let time = &stamp[13..21];
        assert!(chrono::NaiveTime::parse_from_str(time, "%H:%M:%S").is_ok());
    }

    #[tokio::test]
    async fn second_name_is_a_rename_not_a_join() {
        let mut h = start_session().await;

        assert!(h.send(Request::new(FrameKind::Name, b"Alice")).await.is_empty());
        assert!(h.send(Request::new(FrameKind::Name, b"Bob")).await.is_empty());

        assert_eq!(
            h.history().await,
            "*** Alice joined the chat ***\n*** Alice changed their name to Bob ***\n"
        );
    }

    #[tokio::test]
    async fn non_utf8_text_is_stored_byte_for_byte() {
        let mut h = start_session().await;

        assert!(h.send_raw(b"name\xffJ\xf6rg\n").await.is_empty());
        assert!(h.send_raw(b"textcaf\xe9\n").await.is_empty());

        let history = h.history_bytes().await;
        assert!(history.starts_with(b"*** \xffJ\xf6rg joined the chat ***\n"));
        assert!(history.ends_with(b"[\xffJ\xf6rg]: caf\xe9\n"));
        assert_eq!(h.send(Request::hist()).await, history);
    }

    #[tokio::test]
    async fn carriage_return_is_part_of_the_name() {
        let mut h = start_session().await;

        assert!(h.send_raw(b"nameBob\r\n").await.is_empty());
        assert!(h.send_raw(b"texthi\r\n").await.is_empty());

        let history = h.history_bytes().await;
        assert!(history.starts_with(b"*** Bob\r joined the chat ***\n"));
        assert!(history.ends_with(b"[Bob\r]: hi\r\n"));
    }

    #[tokio::test]
    async fn every_frame_appends_one_line_before_its_ack() {
        let mut h = start_session().await;

        h.send(Request::new(FrameKind::Name, b"Alice")).await;
        for i in 0..5 {
            h.send(Request::new(FrameKind::Text, format!("msg {}", i).as_bytes()))
                .await;
            let history = h.history().await;
            let lines: Vec<&str> = history.lines().collect();
            assert_eq!(lines.len(), i + 2);
            assert!(lines[i + 1].ends_with(&format!("[Alice]: msg {}", i)));
        }
    }

    #[tokio::test]
    async fn hist_returns_log_verbatim_with_one_terminator() {
        let mut h = start_session().await;

        assert!(h.send(Request::hist()).await.is_empty());

        h.send(Request::new(FrameKind::Name, b"Alice")).await;
        h.send(Request::new(FrameKind::Text, b"hi")).await;

        let resp = h.send(Request::hist()).await;
        assert_eq!(resp, h.history().await.into_bytes());
        assert!(resp.ends_with(b"[Alice]: hi\n"));

        // hist leaves the log untouched
        let again = h.send(Request::hist()).await;
        assert_eq!(again, resp);
    }

    #[tokio::test]
    async fn quit_closes_gracefully_without_reply() {
        let mut h = start_session().await;
        h.send(Request::new(FrameKind::Name, b"Alice")).await;

        h.conn.get_mut().write_all(&Request::quit().encode()).await.unwrap();
        h.task.await.unwrap().unwrap();

        let mut rest = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut h.conn, &mut rest)
            .await
            .unwrap();
        assert!(rest.is_empty());

        let history = String::from_utf8(h.state.history.read_all().await.unwrap()).unwrap();
        assert_eq!(
            history,
            "*** Alice joined the chat ***\n*** Alice has left the chat ***\n"
        );
        let registry = h.state.registry.lock().await;
        assert_eq!(registry.live(), 0);
        assert_eq!(registry.name_of(0), None);
    }

    #[tokio::test]
    async fn dropped_connection_is_a_bad_disconnect() {
        let mut h = start_session().await;
        h.send(Request::new(FrameKind::Name, b"Alice")).await;

        drop(h.conn);
        h.task.await.unwrap().unwrap();

        let history = String::from_utf8(h.state.history.read_all().await.unwrap()).unwrap();
        assert!(history.ends_with("*** Alice has left the chat ***\n"));
        assert_eq!(h.state.registry.lock().await.live(), 0);
    }

    #[tokio::test]
    async fn failed_reply_ends_only_this_session() {
        let mut h = start_session().await;
        h.send(Request::new(FrameKind::Name, b"Alice")).await;

        let mut conn = h.conn;
        conn.get_mut().write_all(&Request::hist().encode()).await.unwrap();
        drop(conn);
        h.task.await.unwrap().unwrap();

        let history = String::from_utf8(h.state.history.read_all().await.unwrap()).unwrap();
        assert!(history.ends_with("*** Alice has left the chat ***\n"));
        assert_eq!(h.state.registry.lock().await.live(), 0);
    }

    #[tokio::test]
    async fn truncated_frame_ends_the_session() {
        let mut h = start_session().await;

        h.conn.get_mut().write_all(b"te\n").await.unwrap();
        h.task.await.unwrap().unwrap();

        assert_eq!(
            String::from_utf8(h.state.history.read_all().await.unwrap()).unwrap(),
            "***  has left the chat ***\n"
        );
    }

    #[tokio::test]
    async fn unknown_tag_is_acked_without_side_effects() {
        let mut h = start_session().await;

        assert!(h.send_raw(b"pingpayload\n").await.is_empty());
        assert!(h.history().await.is_empty());

        // session is still in lockstep afterwards
        assert!(h.send(Request::new(FrameKind::Name, b"Alice")).await.is_empty());
        assert_eq!(h.history().await, "*** Alice joined the chat ***\n");
    }

    #[tokio::test]
    async fn history_failure_is_returned_to_the_caller() {
        let dir = TempDir::new().unwrap();
        let state = Arc::new(ServerState::new(dir.path().join("nope").join("history.txt")));
        let mut h = start_session_on(state, dir).await;

        h.conn
            .get_mut()
            .write_all(&Request::new(FrameKind::Name, b"Alice").encode())
            .await
            .unwrap();
        assert!(h.task.await.unwrap().is_err());
    }

    // Each session only ever touches its own registry entry, and the shared
    // lock keeps simultaneous renames from losing updates.
    #[tokio::test]
    async fn concurrent_sessions_rename_independently() {
        let dir = TempDir::new().unwrap();
        let state = Arc::new(ServerState::new(dir.path().join("history.txt")));

        let mut clients = Vec::new();
        for i in 0..8 {
            let id = state.registry.lock().await.admit();
            let (client, server) = duplex(4096);
            tokio::spawn(Session::new(id, server, state.clone()).run());
            clients.push(tokio::spawn(async move {
                let mut conn = BufReader::new(client);
                for name in [format!("user{}", i), format!("renamed{}", i)] {
                    conn.get_mut()
                        .write_all(&Request::new(FrameKind::Name, name.as_bytes()).encode())
                        .await
                        .unwrap();
                    read_response(&mut conn).await.unwrap();
                }
                conn
            }));
        }
        let mut conns = Vec::new();
        for c in clients {
            conns.push(c.await.unwrap());
        }

        let history = String::from_utf8(state.history.read_all().await.unwrap()).unwrap();
        for i in 0..8 {
            let joined = format!("*** user{} joined the chat ***", i);
            let renamed = format!("*** user{} changed their name to renamed{} ***", i, i);
            assert_eq!(history.lines().filter(|l| *l == joined).count(), 1);
            assert_eq!(history.lines().filter(|l| *l == renamed).count(), 1);
        }
        let registry = state.registry.lock().await;
        assert_eq!(registry.live(), 8);
        for id in 0..8 {
            assert!(registry.name_of(id).unwrap().starts_with(b"renamed"));
        }
    }
}
