//! TCI text commands: `name:arg,arg;`, several per frame.

use std::fmt;

/// One command or notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub name: String,
    pub args: Vec<String>,
}

impl Message {
    pub fn new(name: &str, args: &[&dyn fmt::Display]) -> Self {
        Self {
            name: name.to_string(),
            args: args.iter().map(|arg| arg.to_string()).collect(),
        }
    }

    /// Parse one command without its terminator; names are case-insensitive.
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }
        let (name, args) = match text.split_once(':') {
            Some((name, args)) => (name, args.split(',').map(|a| a.trim().to_string()).collect()),
            None => (text, Vec::new()),
        };
        Some(Self {
            name: name.trim().to_lowercase(),
            args,
        })
    }

    pub fn arg(&self, index: usize) -> Option<&str> {
        self.args.get(index).map(String::as_str)
    }

    pub fn int_arg(&self, index: usize) -> Option<i64> {
        self.arg(index)?.parse().ok()
    }

    pub fn bool_arg(&self, index: usize) -> Option<bool> {
        match self.arg(index)?.to_lowercase().as_str() {
            "true" => Some(true),
            "false" => Some(false),
            _ => None,
        }
    }

    /// The last argument; some values come with or without a leading trx index.
    pub fn last_arg(&self) -> Option<&str> {
        self.args.last().map(String::as_str)
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.args.is_empty() {
            write!(f, "{};", self.name)
        } else {
            write!(f, "{}:{};", self.name, self.args.join(","))
        }
    }
}

/// Split a text frame into its commands.
pub fn parse_frame(frame: &str) -> Vec<Message> {
    frame.split(';').filter_map(Message::parse).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_hold_several_commands() {
        let messages = parse_frame("TRX:0,true;\r\nmodulation:1,USB;ready;");
        assert_eq!(
            messages,
            vec![
                Message::new("trx", &[&0, &"true"]),
                Message::new("modulation", &[&1, &"USB"]),
                Message::new("ready", &[]),
            ]
        );
        assert_eq!(messages[0].int_arg(0), Some(0));
        assert_eq!(messages[0].bool_arg(1), Some(true));
        assert_eq!(messages[1].bool_arg(1), None);
        assert!(parse_frame(" ; ;").is_empty());
    }

    #[test]
    fn commands_are_terminated() {
        assert_eq!(Message::new("drive", &[&50]).to_string(), "drive:50;");
        assert_eq!(Message::new("tune", &[&0, &true]).to_string(), "tune:0,true;");
        assert_eq!(Message::new("start", &[]).to_string(), "start;");
    }

    #[test]
    fn drive_may_carry_a_trx() {
        assert_eq!(Message::parse("drive:35").and_then(|m| m.last_arg().map(str::to_string)), Some("35".into()));
        assert_eq!(Message::parse("drive:0,35").and_then(|m| m.last_arg().map(str::to_string)), Some("35".into()));
    }
}
