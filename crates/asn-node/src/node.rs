//! The node: accept loop and per-connection PDU dispatch.

use std::{io::Read, path::Path, sync::Arc};

use asn_crypto::{CryptoBox, Role};
use asn_proto::{BLOB_ID, PubEncr, Version};
use asn_repo::{RepoError, Repos, ServiceKeys};
use tokio::net::{TcpListener, TcpStream};

use crate::{
    config::Config,
    error::NodeError,
    sender::NodeSender,
    session::{self, ACK_ID, LOGIN_ID},
    transport::Transport,
};

/// One running ASN node: repository, replication sink, accept loop.
pub struct Node {
    cfg: Config,
    repos: Arc<Repos>,
    sender: Arc<NodeSender>,
    svc: ServiceKeys,
}

impl Node {
    /// Open the repository and assemble the node.
    pub fn new(cfg: Config, repos_dir: &Path) -> Result<Self, NodeError> {
        let repos = Arc::new(Repos::open(repos_dir)?);
        let svc = cfg.service_keys();
        Ok(Self { cfg, repos, sender: Arc::new(NodeSender::new()), svc })
    }

    /// The node's repository.
    #[must_use]
    pub fn repos(&self) -> &Arc<Repos> {
        &self.repos
    }

    /// The node's replication sink.
    #[must_use]
    pub fn sender(&self) -> &Arc<NodeSender> {
        &self.sender
    }

    /// Accept connections until the listener fails.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> Result<(), NodeError> {
        if self.cfg.server.sec_encr.is_none() {
            return Err(NodeError::Handshake("server secret encr key required to serve"));
        }
        tracing::info!(name = %self.cfg.name, addr = %listener.local_addr()?, "node listening");
        loop {
            match listener.accept().await {
                Ok((stream, addr)) => {
                    let node = Arc::clone(&self);
                    tokio::spawn(async move {
                        if let Err(e) = node.handle_conn(stream, addr.to_string()).await {
                            tracing::debug!(%addr, "connection: {e}");
                        }
                    });
                },
                Err(e) => {
                    tracing::error!("accept: {e}");
                },
            }
        }
    }

    /// Drive one connection: pre-login box, login, then blob PDUs into the
    /// repository.
    async fn handle_conn(&self, stream: TcpStream, peer: String) -> Result<(), NodeError> {
        let Some(sec) = self.cfg.server.sec_encr.clone() else {
            return Err(NodeError::Handshake("server secret encr key required to serve"));
        };
        let pre_login =
            CryptoBox::new(&sec, &self.cfg.admin.pub_encr, &self.cfg.nonce, Role::Responder);

        let transport = Arc::new(
            Transport::builder()
                .with_box(pre_login)
                .with_tmp(self.repos.tmp().clone())
                .with_peer_name(peer)
                .attach(stream)?,
        );

        let mut identity: Option<PubEncr> = None;
        while let Some(mut pdu) = transport.recv().await {
            let mut preamble = [0u8; 2];
            if let Err(e) = pdu.read_exact(&mut preamble) {
                tracing::debug!("runt pdu: {e}");
                continue;
            }
            let v = Version(preamble[0]);
            match preamble[1] {
                LOGIN_ID => {
                    let mut body = Vec::new();
                    pdu.read_to_end(&mut body).map_err(crate::error::TransportError::Io)?;
                    let req = session::parse_login(v, &body)?;
                    let key = session::respond_login(&transport, &req).await?;
                    self.repos.set_logged_in(&key, true)?;
                    self.sender.register(key, Arc::clone(&transport));
                    transport.set_peer_name(&key.to_hex()[..16]);
                    identity = Some(key);
                },
                BLOB_ID => {
                    transport.set_version(v);
                    let version = transport.version();
                    match self.repos.store(self.sender.as_ref(), version, None, &mut pdu) {
                        Ok(sum) => tracing::debug!(%sum, "stored"),
                        // a replica we already hold is a successful no-op
                        Err(RepoError::Exist) => tracing::debug!("duplicate blob"),
                        Err(e) => tracing::warn!("store: {e}"),
                    }
                },
                ACK_ID => tracing::debug!("unexpected ack"),
                other => tracing::debug!(id = other, "unknown pdu id"),
            }
        }

        if let Some(key) = identity {
            self.repos.set_logged_in(&key, false)?;
            self.sender.unregister(&key);
        }
        transport.reset();
        Ok(())
    }

    /// Admin/service keys for permission checks.
    #[must_use]
    pub fn service_keys(&self) -> &ServiceKeys {
        &self.svc
    }

    /// Node configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.cfg
    }
}
