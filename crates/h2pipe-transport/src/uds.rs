use std::io;
use std::os::unix::fs::{FileTypeExt, MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};

use tokio::net::UnixListener;
use tracing::{debug, info};

use crate::endpoint::Endpoint;
use crate::error::{Result, TransportError};
use crate::stream::{ConnectionInfo, IpcStream};
use crate::traits::{Accepted, Transport};

/// Unix domain socket transport.
///
/// Binds a filesystem-path socket, removing a stale socket left at the path by
/// a previous process. The path is removed again on drop, unless something
/// else has replaced it in the meantime.
pub struct UnixSocketTransport {
    listener: UnixListener,
    endpoint: Endpoint,
    path: PathBuf,
    created_inode: Option<(u64, u64)>,
}

impl UnixSocketTransport {
    /// Default permission mode for created socket paths.
    pub const DEFAULT_SOCKET_MODE: u32 = 0o600;
    /// `sockaddr_un.sun_path` is 108 bytes on Linux, 104 on macOS and the BSDs.
    #[cfg(target_os = "linux")]
    pub const MAX_PATH_LEN: usize = 108;
    #[cfg(not(target_os = "linux"))]
    pub const MAX_PATH_LEN: usize = 104;

    /// Bind and listen on `path` with owner-only permissions.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn bind(path: impl AsRef<Path>) -> Result<Self> {
        Self::bind_with_mode(path, Self::DEFAULT_SOCKET_MODE)
    }

    /// Bind and listen on `path` with an explicit permission mode.
    pub fn bind_with_mode(path: impl AsRef<Path>, mode: u32) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let endpoint = Endpoint::Unix(path.clone());
        let bind_error = |source| TransportError::Bind {
            endpoint: endpoint.to_string(),
            source,
        };

        let path_bytes = path.as_os_str().len();
        if path_bytes >= Self::MAX_PATH_LEN {
            return Err(TransportError::PathTooLong {
                path,
                len: path_bytes,
                max: Self::MAX_PATH_LEN,
            });
        }

        // Never remove something that is not a socket.
        if let Ok(metadata) = std::fs::symlink_metadata(&path) {
            if !metadata.file_type().is_socket() {
                return Err(bind_error(io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    "existing path is not a unix socket",
                )));
            }
            debug!(?path, "removing stale socket");
            std::fs::remove_file(&path).map_err(bind_error)?;
        }

        let listener = UnixListener::bind(&path).map_err(bind_error)?;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(mode))
            .map_err(bind_error)?;
        let created = std::fs::symlink_metadata(&path).map_err(bind_error)?;
        let created_inode = Some((created.dev(), created.ino()));

        info!(?path, mode = %format!("{mode:o}"), "listening on unix domain socket");

        Ok(Self {
            listener,
            endpoint,
            path,
            created_inode,
        })
    }

    /// The path this socket is bound to.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Transport for UnixSocketTransport {
    /// Socket listeners accept concurrently on one shared descriptor, so a
    /// handle carries no state of its own.
    type Handle = ();

    fn transport_name(&self) -> &'static str {
        "unix-domain-socket"
    }

    fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    fn create_handle(&self) -> Result<Self::Handle> {
        Ok(())
    }

    async fn wait_for_connection(&self, _handle: Self::Handle) -> io::Result<Accepted> {
        let (stream, addr) = self.listener.accept().await?;
        let remote = match addr.as_pathname() {
            Some(path) => format!("unix:{}", path.display()),
            None => "unix:(unnamed)".to_string(),
        };
        let stream = IpcStream::from_unix(stream);
        let mut info = ConnectionInfo::new(self.endpoint.to_string(), remote);
        info.peer_credentials = stream.peer_credentials();
        debug!(remote = %info.remote, "accepted connection");
        Ok(Accepted { stream, info })
    }
}

impl Drop for UnixSocketTransport {
    fn drop(&mut self) {
        let Some((expected_dev, expected_ino)) = self.created_inode else {
            return;
        };
        if let Ok(metadata) = std::fs::symlink_metadata(&self.path) {
            if metadata.file_type().is_socket()
                && metadata.dev() == expected_dev
                && metadata.ino() == expected_ino
            {
                debug!(path = ?self.path, "cleaning up socket file");
                let _ = std::fs::remove_file(&self.path);
            } else {
                debug!(path = ?self.path, "socket path identity changed; skipping cleanup");
            }
        }
    }
}
