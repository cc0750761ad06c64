use std::{
    fmt,
    io::{Read, Seek, Write},
};

use binrw::{prelude::*, Endian};

/// A UTF-16LE string whose length comes from an external byte count, not a terminator.
#[derive(Clone, Eq, PartialEq, Default)]
pub struct SizedWideString {
    data: Vec<u16>,
}

impl SizedWideString {
    /// Size of the string's data, in bytes.
    pub fn size(&self) -> u64 {
        self.data.len() as u64 * 2
    }
}

impl BinRead for SizedWideString {
    /// The string size, in bytes.
    type Args<'a> = (u64,);

    fn read_options<R: Read + Seek>(
        reader: &mut R,
        endian: Endian,
        (size_bytes,): Self::Args<'_>,
    ) -> BinResult<Self> {
        if size_bytes % 2 != 0 {
            return Err(binrw::Error::AssertFail {
                pos: reader.stream_position()?,
                message: format!("wide string size {size_bytes} is odd"),
            });
        }
        let mut data = Vec::with_capacity((size_bytes / 2) as usize);
        for _ in 0..size_bytes / 2 {
            data.push(u16::read_options(reader, endian, ())?);
        }
        Ok(Self { data })
    }
}

impl BinWrite for SizedWideString {
    type Args<'a> = ();

    fn write_options<W: Write + Seek>(
        &self,
        writer: &mut W,
        endian: Endian,
        args: Self::Args<'_>,
    ) -> BinResult<()> {
        self.data.write_options(writer, endian, args)
    }
}

impl From<&str> for SizedWideString {
    fn from(s: &str) -> Self {
        Self {
            data: s.encode_utf16().collect(),
        }
    }
}

impl FromIterator<u16> for SizedWideString {
    fn from_iter<T: IntoIterator<Item = u16>>(iter: T) -> Self {
        Self {
            data: iter.into_iter().collect(),
        }
    }
}

impl fmt::Display for SizedWideString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s: String = char::decode_utf16(self.data.iter().copied())
            .map(|c| c.unwrap_or(char::REPLACEMENT_CHARACTER))
            .collect();
        f.write_str(&s)
    }
}

impl fmt::Debug for SizedWideString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.to_string())
    }
}
