//! Wire envelope codec
//!
//! Every protocol message is framed the same way:
//!
//! ```text
//! +---------------+----------------+---------------------+
//! | command (12)  | length (4, LE) | payload (variable)  |
//! +---------------+----------------+---------------------+
//! ```
//!
//! The command is ASCII, zero-padded to 12 bytes. The payload is a bincode
//! encoding of the command-specific body, or absent (length 0) for bodyless
//! commands.
//!
//! On the request/response path the reply is framed as one status byte
//! (1 = ok, 0 = error) followed by the bincode body: the success result,
//! or an error message string.

use crate::error::{NodeError, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Fixed width of the command field.
pub const COMMAND_WIDTH: usize = 12;

/// Envelope header: command field plus the 4-byte payload length.
pub const HEADER_LEN: usize = COMMAND_WIDTH + 4;

/// Pads (or truncates) a command name to the fixed command field.
pub fn command_to_bytes(command: &str) -> [u8; COMMAND_WIDTH] {
    let mut field = [0u8; COMMAND_WIDTH];
    let name = command.as_bytes();
    let len = name.len().min(COMMAND_WIDTH);
    field[..len].copy_from_slice(&name[..len]);
    field
}

/// Recovers the command name from the fixed-width field.
pub fn bytes_to_command(field: &[u8; COMMAND_WIDTH]) -> Result<String> {
    let end = field
        .iter()
        .position(|b| *b == 0)
        .unwrap_or(COMMAND_WIDTH);
    let name = std::str::from_utf8(&field[..end])
        .map_err(|_| NodeError::MalformedEnvelope("command is not ASCII".to_string()))?;
    Ok(name.to_string())
}

/// Serializes a payload body with bincode.
pub fn to_payload<T: Serialize>(data: &T) -> Result<Vec<u8>> {
    Ok(bincode::serialize(data)?)
}

/// Deserializes a payload body with bincode.
pub fn from_payload<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    Ok(bincode::deserialize(bytes)?)
}

/// Builds a complete envelope for a command, with or without a body.
pub fn encode_envelope(command: &str, payload: Option<&[u8]>) -> Vec<u8> {
    let payload = payload.unwrap_or(&[]);
    let mut request = Vec::with_capacity(HEADER_LEN + payload.len());
    request.extend_from_slice(&command_to_bytes(command));
    request.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    request.extend_from_slice(payload);
    request
}

/// Splits a received envelope into command name and payload bytes.
pub fn decode_envelope(bytes: &[u8]) -> Result<(String, &[u8])> {
    if bytes.len() < HEADER_LEN {
        return Err(NodeError::MalformedEnvelope(format!(
            "{} bytes received, header needs {}",
            bytes.len(),
            HEADER_LEN
        )));
    }

    let field: [u8; COMMAND_WIDTH] = bytes[..COMMAND_WIDTH]
        .try_into()
        .expect("slice length checked above");
    let command = bytes_to_command(&field)?;

    let length = u32::from_le_bytes(
        bytes[COMMAND_WIDTH..HEADER_LEN]
            .try_into()
            .expect("slice length checked above"),
    ) as usize;

    let body = &bytes[HEADER_LEN..];
    if length > body.len() {
        return Err(NodeError::MalformedEnvelope(format!(
            "declared payload of {} bytes, {} received",
            length,
            body.len()
        )));
    }

    Ok((command, &body[..length]))
}

/// Status byte of a successful response.
const STATUS_OK: u8 = 1;

/// Frames a success response, with an optional result body.
pub fn ok_response<T: Serialize>(result: Option<&T>) -> Result<Vec<u8>> {
    let mut response = vec![STATUS_OK];
    if let Some(result) = result {
        response.extend_from_slice(&bincode::serialize(result)?);
    }
    Ok(response)
}

/// Frames an error response carrying the message string.
pub fn err_response(message: &str) -> Vec<u8> {
    let mut response = vec![0u8];
    // encoding a string cannot fail
    response.extend_from_slice(&bincode::serialize(&message).unwrap_or_default());
    response
}

/// Decodes a response envelope into the expected result type.
///
/// A zero-length response is itself an error; a status-0 response carries
/// the remote error message.
pub fn read_response<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    expect_status(bytes)?;
    Ok(bincode::deserialize(&bytes[1..])?)
}

/// Like [`read_response`] but for calls that only care about success.
pub fn read_empty_response(bytes: &[u8]) -> Result<()> {
    expect_status(bytes)
}

fn expect_status(bytes: &[u8]) -> Result<()> {
    if bytes.is_empty() {
        return Err(NodeError::EmptyResponse);
    }
    if bytes[0] != STATUS_OK {
        let message: String = bincode::deserialize(&bytes[1..])
            .unwrap_or_else(|_| "unreadable remote error".to_string());
        return Err(NodeError::RemoteError(message));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::VersionMessage;
    use crate::peers::PeerAddr;

    #[test]
    fn test_command_field_roundtrip() {
        let field = command_to_bytes("getblocksup");
        assert_eq!(field.len(), COMMAND_WIDTH);
        assert_eq!(bytes_to_command(&field).unwrap(), "getblocksup");
    }

    #[test]
    fn test_command_field_truncates_long_names() {
        let field = command_to_bytes("averylongcommandname");
        assert_eq!(bytes_to_command(&field).unwrap(), "averylongcom");
    }

    #[test]
    fn test_envelope_roundtrip() {
        let body = VersionMessage {
            version: 1,
            best_height: 42,
            from: PeerAddr::new("127.0.0.1", 8333),
        };
        let payload = to_payload(&body).unwrap();
        let envelope = encode_envelope("version", Some(&payload));

        let (command, raw) = decode_envelope(&envelope).unwrap();
        assert_eq!(command, "version");
        let decoded: VersionMessage = from_payload(raw).unwrap();
        assert_eq!(decoded.best_height, 42);
        assert_eq!(decoded.from.port, 8333);
    }

    #[test]
    fn test_envelope_without_body() {
        let envelope = encode_envelope("getfblocks", None);
        assert_eq!(envelope.len(), HEADER_LEN);

        let (command, payload) = decode_envelope(&envelope).unwrap();
        assert_eq!(command, "getfblocks");
        assert!(payload.is_empty());
    }

    #[test]
    fn test_short_envelope_is_malformed() {
        let err = decode_envelope(&[0u8; 7]).unwrap_err();
        assert!(matches!(err, crate::error::NodeError::MalformedEnvelope(_)));
    }

    #[test]
    fn test_overdeclared_length_is_malformed() {
        let mut envelope = encode_envelope("inv", Some(&[1, 2, 3]));
        // claim more payload than was sent
        envelope[COMMAND_WIDTH..HEADER_LEN].copy_from_slice(&100u32.to_le_bytes());
        assert!(decode_envelope(&envelope).is_err());
    }

    #[test]
    fn test_response_roundtrip() {
        let response = ok_response(Some(&vec![7u64, 8, 9])).unwrap();
        let decoded: Vec<u64> = read_response(&response).unwrap();
        assert_eq!(decoded, vec![7, 8, 9]);
    }

    #[test]
    fn test_error_response_surfaces_message() {
        let response = err_response("no such block");
        let err = read_response::<Vec<u64>>(&response).unwrap_err();
        match err {
            crate::error::NodeError::RemoteError(msg) => assert_eq!(msg, "no such block"),
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_empty_response_is_an_error() {
        assert!(matches!(
            read_empty_response(&[]),
            Err(crate::error::NodeError::EmptyResponse)
        ));
    }

    #[test]
    fn test_ok_response_without_body() {
        let response = ok_response::<()>(None).unwrap();
        assert_eq!(response, vec![1]);
        assert!(read_empty_response(&response).is_ok());
    }
}
