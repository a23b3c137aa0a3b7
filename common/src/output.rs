//! Formatos de salida del reduce, elegidos por la clave que trae la tarea.
//!
//! Todos escriben primero a `<path>.tmp` y recién en `commit` renombran al
//! path final, así un reduce abortado no deja salida visible.

use std::{
    collections::HashMap,
    fs::{self, File},
    io::{self, BufWriter, Write},
    path::Path,
};

use tracing::{debug, warn};

use crate::record::SequenceFileWriter;
use crate::reduce::ReduceError;

/// Writer de salida de una partición. Se cierra una sola vez:
/// `commit` publica el archivo, `abort` lo descarta.
pub trait RecordWriter: Send {
    fn write(&mut self, key: &[u8], value: &[u8]) -> io::Result<()>;

    /// Devuelve la ubicación final de la salida.
    fn commit(self: Box<Self>) -> io::Result<String>;

    fn abort(self: Box<Self>) -> io::Result<()>;
}

pub trait OutputFormat: Send + Sync {
    fn key(&self) -> &'static str;

    fn writer(&self, output_path: &str) -> io::Result<Box<dyn RecordWriter>>;
}

enum Sink {
    Text(BufWriter<File>),
    Sequence(SequenceFileWriter<BufWriter<File>>),
}

struct StagedFileWriter {
    final_path: String,
    tmp_path: String,
    sink: Option<Sink>,
    records: u64,
}

impl StagedFileWriter {
    fn create(output_path: &str, sequence: bool) -> io::Result<Self> {
        if let Some(parent) = Path::new(output_path).parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let tmp_path = format!("{}.tmp", output_path);
        let file = BufWriter::new(File::create(&tmp_path)?);
        let sink = if sequence {
            Sink::Sequence(SequenceFileWriter::new(file))
        } else {
            Sink::Text(file)
        };

        Ok(Self {
            final_path: output_path.to_string(),
            tmp_path,
            sink: Some(sink),
            records: 0,
        })
    }

    fn discard_tmp(&self) -> io::Result<()> {
        match fs::remove_file(&self.tmp_path) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }
}

impl RecordWriter for StagedFileWriter {
    fn write(&mut self, key: &[u8], value: &[u8]) -> io::Result<()> {
        let sink = self
            .sink
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "writer ya cerrado"))?;

        match sink {
            Sink::Text(w) => {
                w.write_all(key)?;
                w.write_all(b"\t")?;
                w.write_all(value)?;
                w.write_all(b"\n")?;
            }
            Sink::Sequence(w) => w.write_record(key, value)?,
        }
        self.records += 1;
        Ok(())
    }

    fn commit(mut self: Box<Self>) -> io::Result<String> {
        match self.sink.take() {
            Some(Sink::Text(mut w)) => w.flush()?,
            Some(Sink::Sequence(mut w)) => w.flush()?,
            None => {}
        }
        fs::rename(&self.tmp_path, &self.final_path)?;
        debug!(
            "salida {} publicada ({} registros)",
            self.final_path, self.records
        );
        Ok(self.final_path.clone())
    }

    fn abort(mut self: Box<Self>) -> io::Result<()> {
        self.sink = None;
        self.discard_tmp()
    }
}

impl Drop for StagedFileWriter {
    fn drop(&mut self) {
        // nunca se llamó commit ni abort: no dejamos el temporal tirado
        if self.sink.take().is_some() {
            if let Err(e) = self.discard_tmp() {
                warn!("no se pudo borrar {}: {}", self.tmp_path, e);
            }
        }
    }
}

/// `key\tvalue\n` por registro.
pub struct TextOutputFormat;

impl OutputFormat for TextOutputFormat {
    fn key(&self) -> &'static str {
        "text"
    }

    fn writer(&self, output_path: &str) -> io::Result<Box<dyn RecordWriter>> {
        Ok(Box::new(StagedFileWriter::create(output_path, false)?))
    }
}

/// Mismo formato binario que los archivos intermedios.
pub struct SequenceOutputFormat;

impl OutputFormat for SequenceOutputFormat {
    fn key(&self) -> &'static str {
        "sequence"
    }

    fn writer(&self, output_path: &str) -> io::Result<Box<dyn RecordWriter>> {
        Ok(Box::new(StagedFileWriter::create(output_path, true)?))
    }
}

pub struct OutputFormatRegistry {
    formats: HashMap<&'static str, Box<dyn OutputFormat>>,
}

impl Default for OutputFormatRegistry {
    fn default() -> Self {
        let mut registry = Self {
            formats: HashMap::new(),
        };
        registry.register(Box::new(TextOutputFormat));
        registry.register(Box::new(SequenceOutputFormat));
        registry
    }
}

impl OutputFormatRegistry {
    pub fn register(&mut self, format: Box<dyn OutputFormat>) {
        self.formats.insert(format.key(), format);
    }

    pub fn get_by_key(&self, key: &str) -> Result<&dyn OutputFormat, ReduceError> {
        self.formats
            .get(key)
            .map(|f| f.as_ref())
            .ok_or_else(|| ReduceError::UnknownFormat(key.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{RawRecordReader, SequenceFileReader};
    use std::path::PathBuf;

    fn temp_dir(sub: &str) -> PathBuf {
        let base = std::env::temp_dir().join("output_tests").join(sub);
        let _ = fs::remove_dir_all(&base);
        fs::create_dir_all(&base).unwrap();
        base
    }

    #[test]
    fn text_writer_solo_publica_al_hacer_commit() {
        let tmp = temp_dir("text_commit");
        let out = tmp.join("nested").join("part-0");
        let out_str = out.to_string_lossy().to_string();

        let mut w = TextOutputFormat.writer(&out_str).unwrap();
        w.write(b"hola", b"2").unwrap();
        w.write(b"mundo", b"1").unwrap();

        // antes del commit no hay nada visible en el path final
        assert!(!out.exists());

        let published = w.commit().unwrap();
        assert_eq!(published, out_str);
        assert_eq!(fs::read_to_string(&out).unwrap(), "hola\t2\nmundo\t1\n");
        assert!(!PathBuf::from(format!("{}.tmp", out_str)).exists());
    }

    #[test]
    fn abort_no_deja_salida_ni_temporal() {
        let tmp = temp_dir("abort");
        let out = tmp.join("part-3");
        let out_str = out.to_string_lossy().to_string();

        let mut w = SequenceOutputFormat.writer(&out_str).unwrap();
        w.write(b"k", b"v").unwrap();
        w.abort().unwrap();

        assert!(!out.exists());
        assert!(!PathBuf::from(format!("{}.tmp", out_str)).exists());
    }

    #[test]
    fn writer_descartado_sin_cerrar_borra_el_temporal() {
        let tmp = temp_dir("drop");
        let out_str = tmp.join("part-1").to_string_lossy().to_string();

        {
            let mut w = TextOutputFormat.writer(&out_str).unwrap();
            w.write(b"k", b"v").unwrap();
        }

        assert!(!PathBuf::from(format!("{}.tmp", out_str)).exists());
    }

    #[test]
    fn sequence_writer_se_puede_releer() {
        let tmp = temp_dir("sequence");
        let out_str = tmp.join("part-0").to_string_lossy().to_string();

        let mut w = SequenceOutputFormat.writer(&out_str).unwrap();
        w.write(b"total", b"10").unwrap();
        let path = w.commit().unwrap();

        let mut r = SequenceFileReader::open(&path).unwrap();
        assert_eq!(r.next_record().unwrap(), Some((b"total".to_vec(), b"10".to_vec())));
        assert_eq!(r.next_record().unwrap(), None);
    }

    #[test]
    fn registry_rechaza_formato_desconocido() {
        let registry = OutputFormatRegistry::default();
        assert_eq!(registry.get_by_key("text").unwrap().key(), "text");
        assert!(matches!(
            registry.get_by_key("parquet"),
            Err(ReduceError::UnknownFormat(_))
        ));
    }
}
