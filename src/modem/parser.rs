//! Line classification for the modem's receive stream.
//!
//! The modem talks in CRLF-terminated ASCII lines. Each complete line falls
//! into exactly one [`Line`] class:
//!
//! ```text
//! +NAME: "a",1,2.5   -> Line::Urc      (notification with typed arguments)
//! OK                 -> Line::Ok       (command completed)
//! >                  -> Line::Prompt   (modem waits for payload, counts as completion)
//! ERROR              -> Line::Error    (command failed)
//! 861234567890123    -> Line::Response (bare scalar answer to a query)
//! ```
//!
//! Malformed input never fails: anything that does not parse as a more
//! specific class degrades to a bare string argument or a bare response.

use core::fmt;

/// Marker that starts every notification line.
pub const URC_MARKER: u8 = b'+';

const LINE_END: &[u8] = b"\r\n";

/// Longest digit run that is still classified as an integer.
const MAX_INT_DIGITS: usize = 9;

/// One typed value from a notification's argument list.
#[derive(Debug, Clone, PartialEq)]
pub enum AtArgument {
    /// A quoted string (quotes stripped) or an unclassifiable bare token.
    Str(String),
    /// A short run of digits. The original text is kept because hex payloads
    /// made only of digits look like integers.
    Int {
        /// Parsed value.
        value: i64,
        /// Token exactly as received.
        text: String,
    },
    /// A token containing a decimal point.
    Float(f64),
}

impl AtArgument {
    /// Integer value, if this argument was classified as one.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            AtArgument::Int { value, .. } => Some(*value),
            _ => None,
        }
    }

    /// Textual form of string and integer arguments.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AtArgument::Str(s) => Some(s),
            AtArgument::Int { text, .. } => Some(text),
            AtArgument::Float(_) => None,
        }
    }

    /// Floating-point value, if this argument was classified as one.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            AtArgument::Float(value) => Some(*value),
            _ => None,
        }
    }

    fn classify(token: &str) -> Self {
        let token = token.trim();
        if let Some(quoted) = token.strip_prefix('"') {
            let inner = quoted.strip_suffix('"').unwrap_or(quoted);
            return AtArgument::Str(inner.to_string());
        }
        if token.contains('.') {
            return match token.parse::<f64>() {
                Ok(value) => AtArgument::Float(value),
                Err(_) => AtArgument::Str(token.to_string()),
            };
        }
        if is_number(token) {
            if let Ok(value) = token.parse::<i64>() {
                return AtArgument::Int {
                    value,
                    text: token.to_string(),
                };
            }
        }
        AtArgument::Str(token.to_string())
    }
}

fn is_number(token: &str) -> bool {
    !token.is_empty() && token.len() <= MAX_INT_DIGITS && token.bytes().all(|b| b.is_ascii_digit())
}

/// A parsed unsolicited notification: `+COMMAND: arg,arg,...`.
///
/// This is the only shape that crosses from the engine to the adapters.
/// Consumers must check the argument count before indexing; the helpers
/// below return `None` instead of panicking.
#[derive(Debug, Clone, PartialEq)]
pub struct Urc {
    /// Notification name without the leading marker.
    pub command: String,
    /// Arguments in wire order.
    pub arguments: Vec<AtArgument>,
}

impl Urc {
    /// Build a notification from its parts.
    pub fn new(command: impl Into<String>, arguments: Vec<AtArgument>) -> Self {
        Self {
            command: command.into(),
            arguments,
        }
    }

    /// Parse the text after the marker, e.g. `MIPOPEN: 1,0`.
    pub fn parse(text: &str) -> Self {
        match text.find(": ") {
            Some(pos) => Self::new(&text[..pos], split_arguments(&text[pos + 2..])),
            None => Self::new(text, Vec::new()),
        }
    }

    /// Number of arguments.
    pub fn len(&self) -> usize {
        self.arguments.len()
    }

    /// `true` when the notification carries no arguments.
    pub fn is_empty(&self) -> bool {
        self.arguments.is_empty()
    }

    /// Integer argument at `index`.
    pub fn int(&self, index: usize) -> Option<i64> {
        self.arguments.get(index).and_then(AtArgument::as_int)
    }

    /// String (or integer text) argument at `index`.
    pub fn str(&self, index: usize) -> Option<&str> {
        self.arguments.get(index).and_then(AtArgument::as_str)
    }
}

impl fmt::Display for Urc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "+{}", self.command)?;
        for (i, argument) in self.arguments.iter().enumerate() {
            f.write_str(if i == 0 { ": " } else { "," })?;
            match argument {
                AtArgument::Str(s) => write!(f, "\"{}\"", s)?,
                AtArgument::Int { text, .. } => f.write_str(text)?,
                AtArgument::Float(value) => write!(f, "{}", value)?,
            }
        }
        Ok(())
    }
}

/// Split a comma separated value section. Commas inside double quotes do
/// not split.
fn split_arguments(values: &str) -> Vec<AtArgument> {
    let mut arguments = Vec::new();
    if values.is_empty() {
        return arguments;
    }
    let mut start = 0;
    let mut in_quotes = false;
    for (i, c) in values.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                arguments.push(AtArgument::classify(&values[start..i]));
                start = i + 1;
            }
            _ => {}
        }
    }
    arguments.push(AtArgument::classify(&values[start..]));
    arguments
}

/// One classified line from the receive stream.
#[derive(Debug, Clone, PartialEq)]
pub enum Line {
    /// An unsolicited notification.
    Urc(Urc),
    /// The success terminator.
    Ok,
    /// The send prompt.
    Prompt,
    /// The error terminator.
    Error,
    /// A bare scalar response.
    Response(String),
}

fn find_line_end(buf: &[u8]) -> Option<usize> {
    buf.windows(LINE_END.len()).position(|w| w == LINE_END)
}

/// Extract the next complete line from `buf`, consuming exactly the bytes
/// it classified. Empty lines are skipped. Returns `None` once no complete
/// line is left; the partial tail stays in `buf`.
pub fn next_line(buf: &mut Vec<u8>) -> Option<Line> {
    loop {
        let end = find_line_end(buf)?;
        if end == 0 {
            buf.drain(..LINE_END.len());
            continue;
        }

        let line = &buf[..end];
        let classified = if line[0] == URC_MARKER {
            let text = String::from_utf8_lossy(&line[1..]).into_owned();
            buf.drain(..end + LINE_END.len());
            Line::Urc(Urc::parse(&text))
        } else if line == b"OK" {
            buf.drain(..end + LINE_END.len());
            Line::Ok
        } else if line[0] == b'>' {
            // Only the marker (and its padding) belongs to the prompt.
            let consumed = 1 + line[1..].iter().take_while(|&&b| b == b' ').count();
            buf.drain(..consumed);
            Line::Prompt
        } else if line == b"ERROR" {
            buf.drain(..end + LINE_END.len());
            Line::Error
        } else {
            let text = String::from_utf8_lossy(line).into_owned();
            buf.drain(..end + LINE_END.len());
            Line::Response(text)
        };
        return Some(classified);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(input: &[u8]) -> (Vec<Line>, Vec<u8>) {
        let mut buf = input.to_vec();
        let mut out = Vec::new();
        while let Some(line) = next_line(&mut buf) {
            out.push(line);
        }
        (out, buf)
    }

    #[test]
    fn test_typed_arguments_in_order() {
        let (out, rest) = lines(b"+NAME: \"a\",1,2.5\r\n");
        assert!(rest.is_empty());
        let Line::Urc(urc) = &out[0] else {
            panic!("expected a notification, got {:?}", out[0]);
        };
        assert_eq!(urc.command, "NAME");
        assert_eq!(urc.arguments[0], AtArgument::Str("a".into()));
        assert_eq!(urc.int(1), Some(1));
        assert_eq!(urc.arguments[2].as_float(), Some(2.5));
    }

    #[test]
    fn test_partial_line_is_kept() {
        let (out, rest) = lines(b"OK\r\n+MIPURC: \"rtcp\",1,4");
        assert_eq!(out, vec![Line::Ok]);
        assert_eq!(rest, b"+MIPURC: \"rtcp\",1,4");
    }

    #[test]
    fn test_terminal_tokens_and_scalar_response() {
        let (out, rest) = lines(b"\r\n460001234567890\r\n\r\nOK\r\nERROR\r\n");
        assert_eq!(
            out,
            vec![
                Line::Response("460001234567890".into()),
                Line::Ok,
                Line::Error
            ]
        );
        assert!(rest.is_empty());
    }

    #[test]
    fn test_prompt_consumes_only_marker() {
        let mut buf = b"> \r\nOK\r\n".to_vec();
        assert_eq!(next_line(&mut buf), Some(Line::Prompt));
        assert_eq!(buf, b"\r\nOK\r\n");
        assert_eq!(next_line(&mut buf), Some(Line::Ok));
        assert_eq!(next_line(&mut buf), None);
    }

    #[test]
    fn test_notification_without_values() {
        let (out, _) = lines(b"+MATREADY\r\n");
        assert_eq!(out, vec![Line::Urc(Urc::new("MATREADY", Vec::new()))]);
    }

    #[test]
    fn test_long_digit_runs_stay_strings() {
        let urc = Urc::parse("ICCID: 8986001234567890");
        assert_eq!(urc.int(0), None);
        assert_eq!(urc.str(0), Some("8986001234567890"));
    }

    #[test]
    fn test_numeric_hex_keeps_text() {
        let urc = Urc::parse("MIPURC: \"rtcp\",1,2,0031");
        assert_eq!(urc.int(3), Some(31));
        assert_eq!(urc.str(3), Some("0031"));
    }

    #[test]
    fn test_quoted_commas_do_not_split() {
        let urc = Urc::parse("COPS: 0,0,\"CHINA, MOBILE\",7");
        assert_eq!(urc.len(), 4);
        assert_eq!(urc.str(2), Some("CHINA, MOBILE"));
    }

    #[test]
    fn test_malformed_tokens_fall_back_to_strings() {
        let urc = Urc::parse("X: 1.2.3,-5,,\"open");
        assert_eq!(urc.str(0), Some("1.2.3"));
        assert_eq!(urc.str(1), Some("-5"));
        assert_eq!(urc.str(2), Some(""));
        assert_eq!(urc.str(3), Some("open"));
        assert_eq!(urc.int(9), None);
    }

    #[test]
    fn test_display_round_trips_shape() {
        let urc = Urc::parse("MQTTURC: \"conn\",0,0");
        assert_eq!(urc.to_string(), "+MQTTURC: \"conn\",0,0");
    }
}
