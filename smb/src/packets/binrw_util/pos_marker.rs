use std::{cell::Cell, fmt::Debug, io::SeekFrom};

use binrw::{BinRead, BinResult, BinWrite, Endian};

/// A placeholder field for a value that is only known after later fields are written,
/// such as a buffer offset or a byte count.
///
/// While writing, the marker emits `T::default()` and remembers its stream position;
/// the writer of the described field later patches the real value in place.
/// While reading, it keeps the position it was read from, next to the value.
pub struct PosMarker<T> {
    pub pos: Cell<u64>,
    pub value: T,
}

impl<T> PosMarker<T>
where
    T: Into<u64> + Copy,
{
    /// A [`SeekFrom`] to the absolute offset held by this marker.
    /// A zero offset means "no buffer": the reader stays where it is.
    pub fn seek_absolute(&self) -> SeekFrom {
        let value: u64 = self.value.into();
        if value == 0 {
            SeekFrom::Current(0)
        } else {
            SeekFrom::Start(value)
        }
    }
}

impl<T> BinRead for PosMarker<T>
where
    T: BinRead,
{
    type Args<'a> = T::Args<'a>;

    fn read_options<R: binrw::io::Read + binrw::io::Seek>(
        reader: &mut R,
        endian: Endian,
        args: Self::Args<'_>,
    ) -> BinResult<Self> {
        let pos = reader.stream_position()?;
        let value = T::read_options(reader, endian, args)?;
        Ok(Self {
            pos: Cell::new(pos),
            value,
        })
    }
}

impl<T> BinWrite for PosMarker<T>
where
    T: BinWrite<Args<'static> = ()> + Default,
{
    type Args<'a> = ();

    fn write_options<W: binrw::io::Write + binrw::io::Seek>(
        &self,
        writer: &mut W,
        endian: Endian,
        args: Self::Args<'_>,
    ) -> BinResult<()> {
        self.pos.set(writer.stream_position()?);
        T::default().write_options(writer, endian, args)
    }
}

impl<T> PosMarker<T>
where
    T: BinWrite<Args<'static> = ()> + TryFrom<u64>,
{
    /// Overwrites the placeholder with `value` and returns to the current position.
    pub fn write_back<V, W>(&self, value: V, writer: &mut W, endian: Endian) -> BinResult<()>
    where
        V: TryInto<T> + Copy + Into<u64>,
        W: binrw::io::Write + binrw::io::Seek,
    {
        let return_to = writer.stream_position()?;
        let converted = value.try_into().map_err(|_| binrw::Error::AssertFail {
            pos: self.pos.get(),
            message: format!("value {} does not fit its field", value.into()),
        })?;
        writer.seek(SeekFrom::Start(self.pos.get()))?;
        converted.write_options(writer, endian, ())?;
        writer.seek(SeekFrom::Start(return_to))?;
        Ok(())
    }

    /// Writes `value`, then patches the offset and/or size markers that describe it.
    /// Offsets are absolute from the start of the stream.
    fn write_described<V, S, W>(
        value: &V,
        writer: &mut W,
        endian: Endian,
        offset_marker: Option<&Self>,
        size_marker: Option<&PosMarker<S>>,
        value_args: V::Args<'_>,
    ) -> BinResult<()>
    where
        V: BinWrite,
        S: BinWrite<Args<'static> = ()> + TryFrom<u64>,
        W: binrw::io::Write + binrw::io::Seek,
    {
        let start = writer.stream_position()?;
        if let Some(offset_marker) = offset_marker {
            offset_marker.write_back(start, writer, endian)?;
        }
        value.write_options(writer, endian, value_args)?;
        if let Some(size_marker) = size_marker {
            let size = writer.stream_position()? - start;
            size_marker.write_back(size, writer, endian)?;
        }
        Ok(())
    }

    /// Writer for a buffer whose absolute offset lives in this marker.
    #[binrw::writer(writer, endian)]
    pub fn write_aoff<U>(value: &U, offset_marker: &Self) -> BinResult<()>
    where
        U: BinWrite<Args<'static> = ()>,
    {
        Self::write_described::<U, T, _>(value, writer, endian, Some(offset_marker), None, ())
    }

    /// Writer for a buffer with an absolute offset marker and a size marker.
    #[binrw::writer(writer, endian)]
    pub fn write_aoff_size<U, S>(
        value: &U,
        offset_marker: &Self,
        size_marker: &PosMarker<S>,
    ) -> BinResult<()>
    where
        U: BinWrite<Args<'static> = ()>,
        S: BinWrite<Args<'static> = ()> + TryFrom<u64>,
    {
        Self::write_described(
            value,
            writer,
            endian,
            Some(offset_marker),
            Some(size_marker),
            (),
        )
    }

    /// Writer for a value whose byte length lives in this marker.
    #[binrw::writer(writer, endian)]
    pub fn write_size<U>(value: &U, size_marker: &Self) -> BinResult<()>
    where
        U: BinWrite<Args<'static> = ()>,
    {
        Self::write_described::<U, T, _>(value, writer, endian, None, Some(size_marker), ())
    }
}

impl<T> Debug for PosMarker<T>
where
    T: Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PosMarker({:?} @ {})", self.value, self.pos.get())
    }
}

impl<T> Default for PosMarker<T>
where
    T: Default,
{
    fn default() -> Self {
        Self {
            pos: Cell::new(u64::MAX),
            value: T::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use binrw::prelude::*;
    use std::io::Cursor;

    #[binrw::binrw]
    #[derive(Debug)]
    #[brw(little)]
    struct Described {
        offset: PosMarker<u16>,
        length: PosMarker<u16>,
        #[br(seek_before = offset.seek_absolute(), count = length.value)]
        #[bw(write_with = PosMarker::write_aoff_size, args(offset, length))]
        buffer: Vec<u8>,
    }

    #[test]
    fn test_offset_and_size_are_patched() {
        let value = Described {
            offset: Default::default(),
            length: Default::default(),
            buffer: vec![0xaa, 0xbb, 0xcc],
        };
        let mut cursor = Cursor::new(Vec::new());
        value.write(&mut cursor).unwrap();
        assert_eq!(
            cursor.into_inner(),
            [0x04, 0x00, 0x03, 0x00, 0xaa, 0xbb, 0xcc]
        );
    }

    #[test]
    fn test_read_follows_offset() {
        let data = [0x05, 0x00, 0x02, 0x00, 0xff, 0x11, 0x22];
        let parsed = Described::read(&mut Cursor::new(data)).unwrap();
        assert_eq!(parsed.buffer, [0x11, 0x22]);
        assert_eq!(parsed.offset.pos.get(), 0);
    }
}
