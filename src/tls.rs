//! TLS ClientHello SNI extraction
//!
//! Walks the first bytes of a TLS record and pulls the server-name
//! extension out of a ClientHello. Malformed or truncated input never
//! errors, it just yields nothing.

const TLS_HANDSHAKE: u8 = 0x16;
const CLIENT_HELLO: u8 = 0x01;
const EXTENSION_SNI: u16 = 0x0000;
const SNI_HOSTNAME: u8 = 0x00;

/// Extract the SNI hostname from a TLS ClientHello payload.
///
/// Returns `None` for anything that is not a well-formed ClientHello
/// carrying a valid server_name entry.
pub fn extract_sni(payload: &[u8]) -> Option<String> {
    if payload.len() < 5 || payload[0] != TLS_HANDSHAKE {
        return None;
    }

    // Skip the TLS record header
    let mut pos = 5;

    if *payload.get(pos)? != CLIENT_HELLO {
        return None;
    }
    pos += 1;

    // Handshake length (3), legacy version (2), random (32)
    pos += 3 + 2 + 32;

    let session_id_len = *payload.get(pos)? as usize;
    pos += 1 + session_id_len;

    let cipher_suites_len = read_u16(payload, pos)? as usize;
    pos += 2 + cipher_suites_len;

    let compression_len = *payload.get(pos)? as usize;
    pos += 1 + compression_len;

    let extensions_len = read_u16(payload, pos)? as usize;
    pos += 2;

    let extensions_end = pos.checked_add(extensions_len)?;
    if extensions_end > payload.len() {
        return None;
    }

    while pos + 4 <= extensions_end {
        let ext_type = read_u16(payload, pos)?;
        let ext_len = read_u16(payload, pos + 2)? as usize;
        pos += 4;

        if pos + ext_len > payload.len() {
            return None;
        }
        if ext_type == EXTENSION_SNI {
            return parse_sni_extension(&payload[pos..pos + ext_len]);
        }
        pos += ext_len;
    }

    None
}

/// Parse the server_name extension body: a 2-byte list length followed
/// by (type:u8, length:u16, data) entries.
fn parse_sni_extension(data: &[u8]) -> Option<String> {
    let list_len = read_u16(data, 0)? as usize;
    let mut pos: usize = 2;

    let list_end = pos.checked_add(list_len)?;
    if list_end > data.len() {
        return None;
    }

    while pos + 3 <= list_end {
        let entry_type = data[pos];
        let entry_len = read_u16(data, pos + 1)? as usize;
        pos += 3;

        if entry_type == SNI_HOSTNAME && pos + entry_len <= data.len() {
            if let Ok(hostname) = std::str::from_utf8(&data[pos..pos + entry_len]) {
                if is_valid_hostname(hostname) {
                    return Some(hostname.to_string());
                }
            }
        }

        pos += entry_len;
    }

    None
}

fn read_u16(data: &[u8], pos: usize) -> Option<u16> {
    let hi = *data.get(pos)?;
    let lo = *data.get(pos.checked_add(1)?)?;
    Some(u16::from_be_bytes([hi, lo]))
}

/// ASCII letters, digits, dot and hyphen; 1..=255 bytes; no "..".
fn is_valid_hostname(hostname: &str) -> bool {
    if hostname.is_empty() || hostname.len() > 255 {
        return false;
    }
    if hostname.contains("..") {
        return false;
    }
    hostname
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'.' || b == b'-')
}

#[cfg(test)]
pub(crate) mod tests_support {
    //! ClientHello builders shared with the decoder tests

    use super::{CLIENT_HELLO, TLS_HANDSHAKE};

    /// Build a minimal ClientHello record carrying the given raw SNI
    /// extension entries.
    pub fn client_hello_with_sni_entries(entries: &[(u8, &[u8])]) -> Vec<u8> {
        let mut list = Vec::new();
        for (entry_type, name) in entries {
            list.push(*entry_type);
            list.extend_from_slice(&(name.len() as u16).to_be_bytes());
            list.extend_from_slice(name);
        }

        let mut ext_body = Vec::new();
        ext_body.extend_from_slice(&(list.len() as u16).to_be_bytes());
        ext_body.extend_from_slice(&list);

        let mut extensions = Vec::new();
        // A padding extension first, to exercise iteration
        extensions.extend_from_slice(&21u16.to_be_bytes());
        extensions.extend_from_slice(&2u16.to_be_bytes());
        extensions.extend_from_slice(&[0x00, 0x00]);
        // server_name
        extensions.extend_from_slice(&0u16.to_be_bytes());
        extensions.extend_from_slice(&(ext_body.len() as u16).to_be_bytes());
        extensions.extend_from_slice(&ext_body);

        let mut body = Vec::new();
        body.extend_from_slice(&[0x03, 0x03]); // legacy version
        body.extend_from_slice(&[0u8; 32]); // random
        body.push(0); // session_id length
        body.extend_from_slice(&2u16.to_be_bytes()); // cipher suites length
        body.extend_from_slice(&[0x13, 0x01]);
        body.push(1); // compression methods length
        body.push(0);
        body.extend_from_slice(&(extensions.len() as u16).to_be_bytes());
        body.extend_from_slice(&extensions);

        let mut handshake = vec![CLIENT_HELLO];
        let len = body.len() as u32;
        handshake.extend_from_slice(&len.to_be_bytes()[1..]); // 3-byte length
        handshake.extend_from_slice(&body);

        let mut record = vec![TLS_HANDSHAKE, 0x03, 0x01];
        record.extend_from_slice(&(handshake.len() as u16).to_be_bytes());
        record.extend_from_slice(&handshake);
        record
    }

    pub fn client_hello(hostname: &str) -> Vec<u8> {
        client_hello_with_sni_entries(&[(0x00, hostname.as_bytes())])
    }
}

#[cfg(test)]
mod tests {
    use super::tests_support::{client_hello, client_hello_with_sni_entries};
    use super::*;

    #[test]
    fn test_extracts_hostname() {
        let payload = client_hello("github.com");
        assert_eq!(extract_sni(&payload).as_deref(), Some("github.com"));
    }

    #[test]
    fn test_empty_payload() {
        assert_eq!(extract_sni(&[]), None);
    }

    #[test]
    fn test_not_a_handshake() {
        // Application data record
        assert_eq!(extract_sni(&[0x17, 0x03, 0x01, 0x00, 0x05, 0x01]), None);
    }

    #[test]
    fn test_not_a_client_hello() {
        // ServerHello (0x02) in the handshake slot
        let mut payload = client_hello("github.com");
        payload[5] = 0x02;
        assert_eq!(extract_sni(&payload), None);
    }

    #[test]
    fn test_truncated_record() {
        let payload = client_hello("github.com");
        for cut in [4, 10, 40, 48, payload.len() - 3] {
            assert_eq!(extract_sni(&payload[..cut]), None, "cut at {}", cut);
        }
    }

    #[test]
    fn test_no_sni_extension() {
        let payload = vec![
            TLS_HANDSHAKE, 0x03, 0x01, 0x00, 0x05, // record header
            CLIENT_HELLO, 0x00, 0x00, 0x01, 0x03, // truncated hello
        ];
        assert_eq!(extract_sni(&payload), None);
    }

    #[test]
    fn test_non_ascii_hostname_rejected() {
        let payload = client_hello_with_sni_entries(&[(0x00, "b\u{00e4}d.example".as_bytes())]);
        assert_eq!(extract_sni(&payload), None);
    }

    #[test]
    fn test_double_dot_rejected() {
        let payload = client_hello("bad..example.com");
        assert_eq!(extract_sni(&payload), None);
    }

    #[test]
    fn test_skips_non_hostname_entries() {
        let payload =
            client_hello_with_sni_entries(&[(0x01, b"ignored"), (0x00, b"example.org")]);
        assert_eq!(extract_sni(&payload).as_deref(), Some("example.org"));
    }

    #[test]
    fn test_invalid_entry_does_not_mask_later_valid_one() {
        let payload =
            client_hello_with_sni_entries(&[(0x00, b"bad host!"), (0x00, b"example.org")]);
        assert_eq!(extract_sni(&payload).as_deref(), Some("example.org"));
    }
}
