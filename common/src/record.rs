//! Formato binario de los archivos intermedios.
//!
//! Cada registro es `[klen: u32 LE][vlen: u32 LE][key][value]`, uno detrás
//! de otro. Un EOF justo en el borde de un registro termina el stream; un EOF
//! en medio de un registro es un error de decodificación.

use std::{
    fs::{self, File},
    io::{self, BufReader, BufWriter, Read, Write},
    path::Path,
};

use thiserror::Error;

/// Par (clave, valor) en bytes crudos.
pub type RawRecord = (Vec<u8>, Vec<u8>);

const HEADER_LEN: usize = 8;

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("error de E/S: {0}")]
    Io(#[from] io::Error),

    #[error("registro truncado en {origin} (offset {offset})")]
    Truncated { origin: String, offset: u64 },
}

/// Fuente de registros ordenados por clave.
pub trait RawRecordReader: Send {
    /// Siguiente registro, o `None` cuando el stream se terminó.
    fn next_record(&mut self) -> Result<Option<RawRecord>, RecordError>;

    fn close(&mut self) -> Result<(), RecordError> {
        Ok(())
    }
}

impl<T: RawRecordReader + ?Sized> RawRecordReader for Box<T> {
    fn next_record(&mut self) -> Result<Option<RawRecord>, RecordError> {
        (**self).next_record()
    }

    fn close(&mut self) -> Result<(), RecordError> {
        (**self).close()
    }
}

pub struct SequenceFileReader<R: Read> {
    inner: Option<R>,
    origin: String,
    offset: u64,
}

impl SequenceFileReader<BufReader<File>> {
    pub fn open(path: &str) -> Result<Self, RecordError> {
        let file = File::open(path)?;
        Ok(Self::new(BufReader::new(file), path))
    }
}

impl<R: Read> SequenceFileReader<R> {
    pub fn new(inner: R, origin: &str) -> Self {
        Self {
            inner: Some(inner),
            origin: origin.to_string(),
            offset: 0,
        }
    }

    fn truncated(&self) -> RecordError {
        RecordError::Truncated {
            origin: self.origin.clone(),
            offset: self.offset,
        }
    }

    /// Lee hasta llenar `buf` o hasta EOF; devuelve cuántos bytes leyó.
    fn fill(inner: &mut R, buf: &mut [u8]) -> io::Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            match inner.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(filled)
    }
}

impl<R: Read + Send> RawRecordReader for SequenceFileReader<R> {
    fn next_record(&mut self) -> Result<Option<RawRecord>, RecordError> {
        let Some(inner) = self.inner.as_mut() else {
            return Ok(None);
        };

        let mut header = [0u8; HEADER_LEN];
        let n = Self::fill(inner, &mut header)?;
        if n == 0 {
            self.inner = None;
            return Ok(None);
        }
        if n < HEADER_LEN {
            return Err(self.truncated());
        }

        let klen = u32::from_le_bytes([header[0], header[1], header[2], header[3]]) as usize;
        let vlen = u32::from_le_bytes([header[4], header[5], header[6], header[7]]) as usize;

        let mut key = vec![0u8; klen];
        let mut value = vec![0u8; vlen];
        let got_key = Self::fill(inner, &mut key)?;
        let got_value = if got_key == klen {
            Self::fill(inner, &mut value)?
        } else {
            0
        };
        if got_key < klen || got_value < vlen {
            return Err(self.truncated());
        }

        self.offset += (HEADER_LEN + klen + vlen) as u64;
        Ok(Some((key, value)))
    }

    fn close(&mut self) -> Result<(), RecordError> {
        self.inner = None;
        Ok(())
    }
}

pub struct SequenceFileWriter<W: Write> {
    inner: W,
}

impl SequenceFileWriter<BufWriter<File>> {
    /// Crea el archivo (y su carpeta si hace falta).
    pub fn create(path: &str) -> io::Result<Self> {
        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        Ok(Self::new(BufWriter::new(File::create(path)?)))
    }
}

impl<W: Write> SequenceFileWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    pub fn write_record(&mut self, key: &[u8], value: &[u8]) -> io::Result<()> {
        let klen = u32::try_from(key.len())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "clave demasiado grande"))?;
        let vlen = u32::try_from(value.len())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "valor demasiado grande"))?;

        self.inner.write_all(&klen.to_le_bytes())?;
        self.inner.write_all(&vlen.to_le_bytes())?;
        self.inner.write_all(key)?;
        self.inner.write_all(value)?;
        Ok(())
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}
