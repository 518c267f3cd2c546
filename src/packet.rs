use std::fmt;

use crate::args::EventArgs;

pub const FIELD_SEPARATOR: char = '|';

/// Field names in wire order, paired with whether surrounding whitespace is trimmed
const FIELDS: [(&str, bool); 9] = [
    ("Status", true),
    ("Date", true),
    ("Time", true),
    ("T0", false),
    ("T1", false),
    ("T2", false),
    ("T3", false),
    ("T4", false),
    ("T5", false),
];

/// Byte written for characters that have no Latin-1 representation
const UNMAPPABLE: u8 = b'?';

/// One Generic TCP event line, without its terminating newline
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    line: String,
}

impl Packet {
    pub fn from_args(args: &EventArgs) -> Self {
        let fields: Vec<String> = FIELDS
            .iter()
            .map(|&(name, trim)| {
                let value = args.get_or_empty(name).replace(FIELD_SEPARATOR, "");
                if trim {
                    value.trim().to_string()
                } else {
                    value
                }
            })
            .collect();

        Self {
            line: fields.join(FIELD_SEPARATOR.to_string().as_str()),
        }
    }

    pub fn line(&self) -> &str {
        &self.line
    }

    /// ISO-8859-1 bytes of the line plus `\n`
    pub fn encode(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.line.len() + 1);
        bytes.extend(
            self.line
                .chars()
                .map(|c| u8::try_from(u32::from(c)).unwrap_or(UNMAPPABLE)),
        );
        bytes.push(b'\n');
        bytes
    }
}

impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.line())
    }
}
