use bytes::Bytes;
use redis_protocol::resp2::types::BytesFrame;
use strum::{Display, EnumString, IntoStaticStr};

/// Commands the ring issues against a key-value backend.
#[derive(EnumString, Display, IntoStaticStr, Debug, Clone, Copy, PartialEq, Eq)]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
pub enum Command {
    Auth,
    Select,
    Ping,
    Get,
    Set,
    FlushAll,
}

impl Command {
    /// Builds the request frame: an array of bulk strings, command name first.
    pub fn frame<I, A>(self, args: I) -> BytesFrame
    where
        I: IntoIterator<Item = A>,
        A: Into<Bytes>,
    {
        let name: &'static str = self.into();
        let mut data = vec![BytesFrame::BulkString(Bytes::from_static(name.as_bytes()))];
        data.extend(args.into_iter().map(|arg| BytesFrame::BulkString(arg.into())));
        BytesFrame::Array(data)
    }

    /// Builds a request frame without arguments.
    pub fn bare(self) -> BytesFrame {
        self.frame(std::iter::empty::<Bytes>())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn names_are_uppercase() {
        assert_eq!(Command::FlushAll.to_string(), "FLUSHALL");
        assert_eq!(<&str>::from(Command::Ping), "PING");
        assert_eq!(Command::from_str("flushall").unwrap(), Command::FlushAll);
        assert_eq!(Command::from_str("Set").unwrap(), Command::Set);
        assert!(Command::from_str("DEL").is_err());
    }

    #[test]
    fn frame_puts_name_first() {
        let frame = Command::Set.frame([
            Bytes::from_static(b"k"),
            Bytes::from_static(b"v"),
            Bytes::from_static(b"EX"),
            Bytes::from_static(b"10"),
        ]);
        let BytesFrame::Array(items) = frame else {
            panic!("expected array");
        };
        assert_eq!(items.len(), 5);
        assert_eq!(items[0], BytesFrame::BulkString(Bytes::from_static(b"SET")));
        assert_eq!(items[4], BytesFrame::BulkString(Bytes::from_static(b"10")));
    }
}
