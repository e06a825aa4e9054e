//! Bolt handshake: magic preamble, version proposal, version negotiation.

use tracing::{debug, warn};

use super::version::Version;
use crate::channel::Channel;
use crate::error::BoltError;

/// `[0x60 0x60 0xB0 0x17]`.
pub const MAGIC_PREAMBLE: u32 = 0x6060_B017;
/// Returned instead of a version by an HTTP server on the same port.
pub const HTTP_PREAMBLE: u32 = 0x4854_5450;

/// Default Bolt port, named in the HTTP-misconfiguration error message.
const DEFAULT_BOLT_PORT: u16 = 7687;

/// Send the magic preamble and four newest-first proposed versions,
/// then read and decode the server's single chosen version.
pub async fn perform_handshake(
    channel: &mut impl Channel,
    proposed: [Version; 4],
) -> Result<Version, BoltError> {
    let mut out = Vec::with_capacity(4 + 4 * 4);
    out.extend_from_slice(&MAGIC_PREAMBLE.to_be_bytes());
    for version in proposed {
        out.extend_from_slice(&version.encode().to_be_bytes());
    }
    channel
        .write_all(&out)
        .await
        .map_err(|e| BoltError::ServiceUnavailable(format!("handshake write failed: {e}")))?;

    let mut response = [0u8; 4];
    read_exact(channel, &mut response).await?;
    let chosen = u32::from_be_bytes(response);

    if chosen == HTTP_PREAMBLE {
        return Err(BoltError::Protocol(format!(
            "server responded with an HTTP preamble instead of a Bolt handshake; \
             is this actually the Bolt port ({DEFAULT_BOLT_PORT})?"
        )));
    }
    if chosen == 0 {
        return Err(BoltError::Protocol(
            "server rejected every proposed protocol version".to_owned(),
        ));
    }

    let version = Version::decode(chosen);
    if !proposed.contains(&version) {
        warn!(negotiated = %version, "server returned a version not among those proposed");
    }
    debug!(negotiated = %version, "bolt handshake complete");
    Ok(version)
}

/// Build the four-version proposal list for a fresh handshake,
/// newest-first, zero-padded when fewer than four candidates are
/// offered.
pub fn propose(candidates: &[Version]) -> [Version; 4] {
    let mut proposed = [Version::new(0, 0); 4];
    for (slot, version) in proposed.iter_mut().zip(candidates.iter()) {
        *slot = *version;
    }
    proposed
}

async fn read_exact(channel: &mut impl Channel, buf: &mut [u8]) -> Result<(), BoltError> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = channel
            .read(&mut buf[filled..])
            .await
            .map_err(|e| BoltError::ServiceUnavailable(format!("handshake read failed: {e}")))?;
        if n == 0 {
            return Err(BoltError::ServiceUnavailable(
                "peer closed the connection during handshake".to_owned(),
            ));
        }
        filled += n;
    }
    Ok(())
}
