//! Configuration line protocol.
//!
//! A client configures its tunnel by sending exactly one message per
//! connection:
//!
//! ```text
//! [2 bytes: payload length (big-endian u16), at most 512]
//! [N bytes: ASCII parameter string]
//! ```
//!
//! The payload is a list of space-separated parameters, each a list of
//! comma-separated fields. The first character of the first field selects
//! the parameter:
//!
//! | tag | fields                 | effect                  |
//! |-----|------------------------|-------------------------|
//! | `q` | none                   | quit, nothing is set up |
//! | `m` | mtu                    | set the MTU             |
//! | `a` | address, prefix length | add an address          |
//! | `r` | address, prefix length | add a route             |
//! | `d` | address                | add a DNS server        |
//! | `s` | domain                 | add a search domain     |
//! | `n` | name                   | set the session name    |
//!
//! Unknown tags are ignored. For example:
//!
//! ```
//! use vpn_tether::control::protocol::{parse, ParseOutcome};
//!
//! let outcome = parse("a,10.0.0.2,24 r,0.0.0.0,0 m,1400").unwrap();
//! let ParseOutcome::Configure(spec) = outcome else { unreachable!() };
//! assert_eq!(spec.mtu, Some(1400));
//! assert_eq!(spec.addresses[0].to_string(), "10.0.0.2/24");
//! ```

use std::fmt;
use std::io::{self, Read, Write};
use std::net::IpAddr;

use thiserror::Error;
use tracing::trace;

/// Largest payload a client may declare.
pub const MAX_CONFIG_LENGTH: usize = 512;

/// Shortest legal message that quits: length 1 followed by `q`.
pub const QUIT_MESSAGE: [u8; 3] = [0, 1, b'q'];

/// Errors while reading or writing a framed configuration line.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Declared or actual payload exceeds [`MAX_CONFIG_LENGTH`].
    #[error("Configuration line too long: {0} bytes (max {1})")]
    MessageTooLarge(usize, usize),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// A parameter could not be converted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// Carries the full text of the offending parameter.
    #[error("Bad parameter: {0}")]
    BadParameter(String),
}

/// An address with its prefix length, e.g. `10.0.0.2/24`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IpPrefix {
    /// Network or host address.
    pub address: IpAddr,
    /// Prefix length, bounded by the address family.
    pub prefix_len: u8,
}

impl IpPrefix {
    /// Build a prefix, rejecting lengths wider than the address family.
    pub fn new(address: IpAddr, prefix_len: u8) -> Option<Self> {
        let max = match address {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        };
        (prefix_len <= max).then_some(Self { address, prefix_len })
    }
}

impl fmt::Display for IpPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.address, self.prefix_len)
    }
}

/// Interface parameters requested by a client.
///
/// Every field is optional; an empty spec is still establishable. Addresses
/// and routes keep the order they were sent in.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InterfaceSpec {
    /// Maximum transmission unit.
    pub mtu: Option<u16>,
    /// Interface addresses, in order.
    pub addresses: Vec<IpPrefix>,
    /// Routes through the interface, in order.
    pub routes: Vec<IpPrefix>,
    /// DNS servers.
    pub dns_servers: Vec<IpAddr>,
    /// DNS search domains.
    pub search_domains: Vec<String>,
    /// Client-chosen label for the session.
    pub session_name: Option<String>,
}

/// Result of a successful parse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseOutcome {
    /// Establish an interface with this spec.
    Configure(InterfaceSpec),
    /// The client asked to quit.
    Quit,
}

/// Parse a configuration line.
///
/// Parameters are applied left to right. A `q` anywhere returns
/// [`ParseOutcome::Quit`] without looking at the rest of the line, even if
/// later parameters are malformed.
pub fn parse(raw: &str) -> Result<ParseOutcome, ParseError> {
    let mut spec = InterfaceSpec::default();

    for parameter in raw.split(' ').filter(|p| !p.is_empty()) {
        let fields: Vec<&str> = parameter.split(',').collect();
        let bad = || ParseError::BadParameter(parameter.to_string());
        let tag = fields[0].chars().next().ok_or_else(bad)?;

        let applied = match tag {
            'q' => return Ok(ParseOutcome::Quit),
            'm' => field(&fields, 1)
                .and_then(|f| f.parse::<u16>().ok())
                .filter(|mtu| *mtu > 0)
                .map(|mtu| spec.mtu = Some(mtu)),
            'a' => prefix(&fields).map(|p| spec.addresses.push(p)),
            'r' => prefix(&fields).map(|p| spec.routes.push(p)),
            'd' => field(&fields, 1)
                .and_then(|f| f.parse::<IpAddr>().ok())
                .map(|a| spec.dns_servers.push(a)),
            's' => field(&fields, 1).map(|d| spec.search_domains.push(d.to_string())),
            'n' => field(&fields, 1).map(|n| spec.session_name = Some(n.to_string())),
            other => {
                trace!("Ignoring unknown parameter tag '{}'", other);
                Some(())
            }
        };

        applied.ok_or_else(bad)?;
    }

    Ok(ParseOutcome::Configure(spec))
}

/// Non-empty field at `index`.
fn field<'a>(fields: &[&'a str], index: usize) -> Option<&'a str> {
    fields.get(index).copied().filter(|f| !f.is_empty())
}

fn prefix(fields: &[&str]) -> Option<IpPrefix> {
    let address = field(fields, 1)?.parse::<IpAddr>().ok()?;
    let prefix_len = field(fields, 2)?.parse::<u8>().ok()?;
    IpPrefix::new(address, prefix_len)
}

/// Decode a payload as ASCII, replacing anything else with `?`.
pub fn decode_payload(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|&b| if b.is_ascii() { b as char } else { '?' })
        .collect()
}

/// Read one framed configuration line.
///
/// An oversized length is rejected before any payload byte is read.
pub fn read_config_line<R: Read + ?Sized>(reader: &mut R) -> Result<String, ProtocolError> {
    let mut len_buf = [0u8; 2];
    reader.read_exact(&mut len_buf)?;
    let len = u16::from_be_bytes(len_buf) as usize;

    if len > MAX_CONFIG_LENGTH {
        return Err(ProtocolError::MessageTooLarge(len, MAX_CONFIG_LENGTH));
    }

    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf)?;
    Ok(decode_payload(&buf))
}

/// Frame a configuration line for the wire.
pub fn encode_message(line: &str) -> Result<Vec<u8>, ProtocolError> {
    let bytes = line.as_bytes();
    if bytes.len() > MAX_CONFIG_LENGTH {
        return Err(ProtocolError::MessageTooLarge(bytes.len(), MAX_CONFIG_LENGTH));
    }

    let mut message = Vec::with_capacity(2 + bytes.len());
    message.extend_from_slice(&(bytes.len() as u16).to_be_bytes());
    message.extend_from_slice(bytes);
    Ok(message)
}

/// Write one framed configuration line and flush.
pub fn write_config_line<W: Write + ?Sized>(
    writer: &mut W,
    line: &str,
) -> Result<(), ProtocolError> {
    let message = encode_message(line)?;
    writer.write_all(&message)?;
    writer.flush()?;
    Ok(())
}

/// Build a configuration line from command-line style arguments.
///
/// A two-character argument `-x` starts a new parameter tagged `x`; every
/// other argument is appended to the current parameter as another field.
/// `["-a", "10.0.0.2", "24", "-m", "1400"]` becomes `a,10.0.0.2,24 m,1400`.
pub fn build_parameters<S: AsRef<str>>(args: &[S]) -> Result<String, ProtocolError> {
    let mut line = String::new();

    for (i, arg) in args.iter().enumerate() {
        let arg = arg.as_ref();
        let (delimiter, text) = match arg.strip_prefix('-') {
            Some(tag) if arg.len() == 2 => (' ', tag),
            _ => (',', arg),
        };

        if i > 0 {
            line.push(delimiter);
        }
        line.push_str(text);
    }

    if line.len() > MAX_CONFIG_LENGTH {
        return Err(ProtocolError::MessageTooLarge(line.len(), MAX_CONFIG_LENGTH));
    }
    Ok(line)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn configure(raw: &str) -> InterfaceSpec {
        match parse(raw) {
            Ok(ParseOutcome::Configure(spec)) => spec,
            other => panic!("Expected Configure for {raw:?}, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_full_line() {
        let spec = configure("a,10.0.0.2,24 r,0.0.0.0,0 d,8.8.8.8 m,1500 n,sess1");

        assert_eq!(spec.addresses, vec![IpPrefix::new("10.0.0.2".parse().unwrap(), 24).unwrap()]);
        assert_eq!(spec.routes, vec![IpPrefix::new("0.0.0.0".parse().unwrap(), 0).unwrap()]);
        assert_eq!(spec.dns_servers, vec!["8.8.8.8".parse::<IpAddr>().unwrap()]);
        assert_eq!(spec.mtu, Some(1500));
        assert_eq!(spec.session_name.as_deref(), Some("sess1"));
        assert!(spec.search_domains.is_empty());
    }

    #[test]
    fn test_quit_short_circuits() {
        assert_eq!(parse("q a,10.0.0.2,24"), Ok(ParseOutcome::Quit));
        assert_eq!(parse("a,10.0.0.2,24 q"), Ok(ParseOutcome::Quit));
        // Later malformed parameters are never looked at.
        assert_eq!(parse("q a,bad,24"), Ok(ParseOutcome::Quit));
        assert_eq!(parse("quit"), Ok(ParseOutcome::Quit));
    }

    #[test]
    fn test_bad_address_names_parameter() {
        assert_eq!(
            parse("a,bad,24"),
            Err(ParseError::BadParameter("a,bad,24".to_string()))
        );
    }

    #[test]
    fn test_bad_parameters() {
        for raw in ["a,10.0.0.2", "a,10.0.0.2,x", "a,10.0.0.2,33", "r,::,129", "m,abc", "m,0",
                    "m,70000", "d,nope", "s", "n,", ",x"] {
            match parse(raw) {
                Err(ParseError::BadParameter(p)) => assert_eq!(p, raw),
                other => panic!("Expected BadParameter for {raw:?}, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_error_reports_only_offending_parameter() {
        let err = parse("m,1400 r,10.0.0.0,x n,s").unwrap_err();
        assert_eq!(err, ParseError::BadParameter("r,10.0.0.0,x".to_string()));
        assert_eq!(err.to_string(), "Bad parameter: r,10.0.0.0,x");
    }

    #[test]
    fn test_unknown_tags_ignored() {
        let spec = configure("x,1,2 z m,1280 hello");
        assert_eq!(spec.mtu, Some(1280));
        assert!(spec.addresses.is_empty());
    }

    #[test]
    fn test_last_value_wins_and_order_kept() {
        let spec = configure(
            "m,1500 n,first a,10.0.0.2,24 a,fd00::2,64 m,1280 r,10.0.0.0,8 r,10.1.0.0,16 n,second",
        );
        assert_eq!(spec.mtu, Some(1280));
        assert_eq!(spec.session_name.as_deref(), Some("second"));
        let addresses: Vec<String> = spec.addresses.iter().map(ToString::to_string).collect();
        assert_eq!(addresses, vec!["10.0.0.2/24", "fd00::2/64"]);
        let routes: Vec<String> = spec.routes.iter().map(ToString::to_string).collect();
        assert_eq!(routes, vec!["10.0.0.0/8", "10.1.0.0/16"]);
    }

    #[test]
    fn test_dns_and_search_domains() {
        let spec = configure("d,8.8.8.8 d,2001:4860:4860::8888 s,corp.example s,example.com");
        assert_eq!(spec.dns_servers.len(), 2);
        assert_eq!(spec.search_domains, vec!["corp.example", "example.com"]);
    }

    #[test]
    fn test_empty_line_and_extra_spaces() {
        assert_eq!(configure(""), InterfaceSpec::default());
        let spec = configure("  m,1400   n,x ");
        assert_eq!(spec.mtu, Some(1400));
        assert_eq!(spec.session_name.as_deref(), Some("x"));
    }

    #[test]
    fn test_extra_fields_ignored() {
        let spec = configure("m,1400,extra a,10.0.0.2,24,extra");
        assert_eq!(spec.mtu, Some(1400));
        assert_eq!(spec.addresses.len(), 1);
    }

    #[test]
    fn test_read_config_line() {
        let mut wire = Cursor::new(encode_message("m,1400 n,test").unwrap());
        assert_eq!(read_config_line(&mut wire).unwrap(), "m,1400 n,test");
    }

    #[test]
    fn test_read_rejects_oversized_length_without_payload() {
        // 513 declared, no payload present at all.
        let mut wire = Cursor::new(vec![0x02, 0x01]);
        match read_config_line(&mut wire) {
            Err(ProtocolError::MessageTooLarge(513, MAX_CONFIG_LENGTH)) => {}
            other => panic!("Expected MessageTooLarge, got {other:?}"),
        }
        assert_eq!(wire.position(), 2);
    }

    #[test]
    fn test_read_truncated_payload() {
        let mut wire = Cursor::new(vec![0x00, 0x05, b'm', b',']);
        assert!(matches!(read_config_line(&mut wire), Err(ProtocolError::Io(_))));
    }

    #[test]
    fn test_non_ascii_is_replaced() {
        assert_eq!(decode_payload(b"n,caf\xc3\xa9"), "n,caf??");
    }

    #[test]
    fn test_quit_message_matches_encoding() {
        assert_eq!(encode_message("q").unwrap(), QUIT_MESSAGE.to_vec());
    }

    #[test]
    fn test_encode_limit() {
        assert!(encode_message(&"s".repeat(MAX_CONFIG_LENGTH)).is_ok());
        assert!(matches!(
            encode_message(&"s".repeat(MAX_CONFIG_LENGTH + 1)),
            Err(ProtocolError::MessageTooLarge(513, 512))
        ));
    }

    #[test]
    fn test_build_parameters() {
        let args = ["-a", "10.0.0.2", "24", "-r", "0.0.0.0", "0", "-m", "1400", "-n", "laptop"];
        assert_eq!(
            build_parameters(&args).unwrap(),
            "a,10.0.0.2,24 r,0.0.0.0,0 m,1400 n,laptop"
        );
        assert_eq!(build_parameters::<&str>(&[]).unwrap(), "");
    }

    #[test]
    fn test_build_parameters_too_long() {
        let long = "x".repeat(600);
        assert!(matches!(
            build_parameters(&["-s", long.as_str()]),
            Err(ProtocolError::MessageTooLarge(_, MAX_CONFIG_LENGTH))
        ));
    }
}
