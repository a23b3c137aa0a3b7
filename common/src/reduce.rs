//! Runner del lado worker: merge de los archivos intermedios de una
//! partición, agrupado por clave y llamada al reducer por grupo.

use std::cmp::Ordering;
use std::io;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::merge::{BytesComparator, KeyComparator, MergeReader};
use crate::output::{OutputFormatRegistry, RecordWriter};
use crate::record::{RawRecordReader, RecordError, SequenceFileReader};
use crate::reducers::{reducer_by_name, Reducer};
use crate::store::StoreError;
use crate::task::ReduceTask;

#[derive(Debug, Error)]
pub enum ReduceError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("error decodificando registros: {0}")]
    Record(#[from] RecordError),

    #[error("error de E/S: {0}")]
    Io(#[from] io::Error),

    #[error("formato de salida desconocido: {0}")]
    UnknownFormat(String),

    #[error("reducer desconocido: {0}")]
    UnknownReducer(String),

    #[error("valor inválido para la clave {key:?}: {value:?}")]
    InvalidValue { key: String, value: String },

    #[error("el reducer falló: {0}")]
    Reducer(String),
}

/// Lo que ve el reducer para emitir registros de salida.
pub trait Emitter {
    fn emit(&mut self, key: &[u8], value: &[u8]) -> Result<(), ReduceError>;
}

struct CountingEmitter<'a> {
    writer: &'a mut Box<dyn RecordWriter>,
    emitted: u64,
}

impl Emitter for CountingEmitter<'_> {
    fn emit(&mut self, key: &[u8], value: &[u8]) -> Result<(), ReduceError> {
        self.writer.write(key, value)?;
        self.emitted += 1;
        Ok(())
    }
}

/// De dónde salen los lectores para cada referencia de archivo.
pub trait RecordSource: Send + Sync {
    fn open(&self, location: &str) -> Result<Box<dyn RawRecordReader>, RecordError>;
}

/// Archivos locales en el formato binario de `record`.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileRecordSource;

impl RecordSource for FileRecordSource {
    fn open(&self, location: &str) -> Result<Box<dyn RawRecordReader>, RecordError> {
        Ok(Box::new(SequenceFileReader::open(location)?))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReduceSummary {
    pub input_files: usize,
    pub records_in: u64,
    pub groups: u64,
    pub records_out: u64,
}

pub struct ReduceRunner<S: RecordSource = FileRecordSource> {
    source: S,
}

impl Default for ReduceRunner<FileRecordSource> {
    fn default() -> Self {
        Self::new(FileRecordSource)
    }
}

impl<S: RecordSource> ReduceRunner<S> {
    pub fn new(source: S) -> Self {
        Self { source }
    }

    /// Reduce una partición completa.
    ///
    /// Sin inputs no hace nada: no llama al reducer y aborta el writer. Ante
    /// cualquier error los lectores se cierran, el writer se aborta y el
    /// error sube al caller; sólo un run exitoso hace commit.
    pub fn run<C: KeyComparator>(
        &self,
        inputs: &[String],
        comparator: C,
        reducer: &mut dyn Reducer,
        writer: Box<dyn RecordWriter>,
    ) -> Result<(ReduceSummary, Option<String>), ReduceError> {
        if inputs.is_empty() {
            debug!("sin archivos de entrada, nada que reducir");
            writer.abort()?;
            return Ok((ReduceSummary::default(), None));
        }

        let mut readers: Vec<Box<dyn RawRecordReader>> = Vec::with_capacity(inputs.len());
        for location in inputs {
            match self.source.open(location) {
                Ok(r) => readers.push(r),
                Err(e) => {
                    warn!("no se pudo abrir {}: {}", location, e);
                    for mut r in readers {
                        let _ = r.close();
                    }
                    writer.abort()?;
                    return Err(e.into());
                }
            }
        }

        let mut summary = ReduceSummary {
            input_files: inputs.len(),
            ..ReduceSummary::default()
        };
        let mut writer = writer;
        let mut merged = MergeReader::new(readers, comparator);

        let driven = drive(&mut merged, reducer, &mut writer, &mut summary);
        let closed = merged.close().map_err(ReduceError::from);

        match driven.and(closed) {
            Ok(()) => {
                let location = writer.commit()?;
                info!(
                    "reduce terminado: {} archivos, {} registros, {} claves -> {}",
                    summary.input_files, summary.records_in, summary.groups, location
                );
                Ok((summary, Some(location)))
            }
            Err(e) => {
                if let Err(abort_err) = writer.abort() {
                    warn!("no se pudo abortar la salida: {}", abort_err);
                }
                Err(e)
            }
        }
    }
}

fn drive<C: KeyComparator>(
    merged: &mut MergeReader<C>,
    reducer: &mut dyn Reducer,
    writer: &mut Box<dyn RecordWriter>,
    summary: &mut ReduceSummary,
) -> Result<(), ReduceError> {
    let mut emitter = CountingEmitter { writer, emitted: 0 };
    let mut group_key: Option<Vec<u8>> = None;
    let mut values: Vec<Vec<u8>> = Vec::new();

    while let Some((key, value)) = merged.next_record()? {
        summary.records_in += 1;

        let same_group = group_key
            .as_ref()
            .map(|k| merged.comparator().compare(k, &key) == Ordering::Equal)
            .unwrap_or(false);

        if same_group {
            values.push(value);
            continue;
        }

        if let Some(k) = group_key.take() {
            summary.groups += 1;
            let mut it = std::mem::take(&mut values).into_iter();
            reducer.reduce(&k, &mut it, &mut emitter)?;
        }
        group_key = Some(key);
        values.push(value);
    }

    if let Some(k) = group_key.take() {
        summary.groups += 1;
        let mut it = values.into_iter();
        reducer.reduce(&k, &mut it, &mut emitter)?;
    }

    summary.records_out = emitter.emitted;
    Ok(())
}

/// Ejecuta una tarea de reduce completa tal como la asigna el master:
/// resuelve formato de salida y reducer por nombre y corre el runner.
/// Devuelve la ubicación de la salida, o `None` si la partición venía vacía.
pub fn run_reduce_task(
    task: &ReduceTask,
    inputs: &[String],
    formats: &OutputFormatRegistry,
) -> Result<(ReduceSummary, Option<String>), ReduceError> {
    let format = formats.get_by_key(&task.output_format)?;
    let mut reducer = reducer_by_name(&task.reducer)?;
    let writer = format.writer(&task.output_path())?;

    ReduceRunner::default().run(inputs, BytesComparator, reducer.as_mut(), writer)
}
