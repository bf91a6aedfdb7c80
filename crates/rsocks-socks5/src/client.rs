//! Client side of the SOCKS5 handshake
//!
//! Used by operators' tooling and by the end-to-end tests to drive a CONNECT
//! through the public front.

use crate::error::Socks5Error;
use crate::protocol::{
    TargetAddr, AUTH_SUCCESS, AUTH_VERSION, CMD_CONNECT, METHOD_NO_ACCEPTABLE, METHOD_NO_AUTH,
    METHOD_USER_PASS, SOCKS_VERSION,
};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Run a CONNECT handshake for `target` over `stream`
///
/// Offers username/password authentication when `credentials` is given,
/// otherwise no authentication. On success the stream is connected to
/// `target` and the bound address reported by the proxy is returned.
pub async fn connect<S>(
    stream: &mut S,
    target: &TargetAddr,
    credentials: Option<(&str, &str)>,
) -> Result<TargetAddr, Socks5Error>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let method = if credentials.is_some() {
        METHOD_USER_PASS
    } else {
        METHOD_NO_AUTH
    };
    stream.write_all(&[SOCKS_VERSION, 1, method]).await?;

    let mut selection = [0u8; 2];
    stream.read_exact(&mut selection).await?;
    if selection[0] != SOCKS_VERSION {
        return Err(Socks5Error::UnsupportedVersion(selection[0]));
    }
    if selection[1] == METHOD_NO_ACCEPTABLE || selection[1] != method {
        return Err(Socks5Error::NoAcceptableMethod);
    }

    if let Some((username, password)) = credentials {
        let user_len = u8::try_from(username.len()).map_err(|_| Socks5Error::CredentialsTooLong)?;
        let pass_len = u8::try_from(password.len()).map_err(|_| Socks5Error::CredentialsTooLong)?;

        let mut msg = Vec::with_capacity(3 + username.len() + password.len());
        msg.push(AUTH_VERSION);
        msg.push(user_len);
        msg.extend_from_slice(username.as_bytes());
        msg.push(pass_len);
        msg.extend_from_slice(password.as_bytes());
        stream.write_all(&msg).await?;

        let mut status = [0u8; 2];
        stream.read_exact(&mut status).await?;
        if status[1] != AUTH_SUCCESS {
            return Err(Socks5Error::AuthenticationFailed(username.to_string()));
        }
    }

    let mut request = vec![SOCKS_VERSION, CMD_CONNECT, 0x00];
    request.extend_from_slice(&target.to_bytes()?);
    stream.write_all(&request).await?;

    let mut header = [0u8; 4];
    stream.read_exact(&mut header).await?;
    let [version, reply, _reserved, atyp] = header;
    if version != SOCKS_VERSION {
        return Err(Socks5Error::UnsupportedVersion(version));
    }

    let bound = TargetAddr::read_from(stream, atyp).await?;
    if reply != 0x00 {
        return Err(Socks5Error::Rejected(reply));
    }

    Ok(bound)
}
