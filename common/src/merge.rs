//! Merge k-way de streams ordenados por clave.

use std::cmp::Ordering;

use tracing::debug;

use crate::record::{RawRecord, RawRecordReader, RecordError};

/// Comparación de claves en bytes crudos. Cada job puede inyectar la suya
/// según cómo serialice las claves.
pub trait KeyComparator: Send + Sync {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering;
}

impl<F> KeyComparator for F
where
    F: Fn(&[u8], &[u8]) -> Ordering + Send + Sync,
{
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        self(a, b)
    }
}

/// Orden lexicográfico de bytes (el default).
#[derive(Debug, Clone, Copy, Default)]
pub struct BytesComparator;

impl KeyComparator for BytesComparator {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        a.cmp(b)
    }
}

struct MergeCursor {
    input: usize,
    reader: Box<dyn RawRecordReader>,
    current: Option<RawRecord>,
}

/// Une N lectores ordenados en un único stream ordenado.
///
/// En empates gana el lector de menor índice, así el resultado es
/// determinista y estable. Es perezoso y no se puede reiniciar.
pub struct MergeReader<C: KeyComparator> {
    comparator: C,
    cursors: Vec<MergeCursor>,
    single: Option<Box<dyn RawRecordReader>>,
    primed: bool,
    // cursor que emitió el último registro y todavía no avanzó
    pending_advance: Option<usize>,
}

impl<C: KeyComparator> MergeReader<C> {
    pub fn new(readers: Vec<Box<dyn RawRecordReader>>, comparator: C) -> Self {
        let mut readers = readers;
        if readers.len() == 1 {
            debug!("merge con un solo input: pass-through");
            return Self {
                comparator,
                cursors: Vec::new(),
                single: readers.pop(),
                primed: true,
                pending_advance: None,
            };
        }

        let cursors = readers
            .into_iter()
            .enumerate()
            .map(|(input, reader)| MergeCursor {
                input,
                reader,
                current: None,
            })
            .collect();

        Self {
            comparator,
            cursors,
            single: None,
            primed: false,
            pending_advance: None,
        }
    }

    pub fn comparator(&self) -> &C {
        &self.comparator
    }

    fn prime(&mut self) -> Result<(), RecordError> {
        for cursor in self.cursors.iter_mut() {
            cursor.current = cursor.reader.next_record()?;
            if cursor.current.is_none() {
                cursor.reader.close()?;
            }
        }
        self.cursors.retain(|c| c.current.is_some());
        self.primed = true;
        Ok(())
    }

    fn advance(&mut self, pos: usize) -> Result<(), RecordError> {
        let cursor = &mut self.cursors[pos];
        cursor.current = cursor.reader.next_record()?;
        if cursor.current.is_none() {
            debug!("input {} del merge agotado", cursor.input);
            cursor.reader.close()?;
            // remove (y no swap_remove) para conservar el orden de desempate
            self.cursors.remove(pos);
        }
        Ok(())
    }

    fn smallest(&self) -> Option<usize> {
        let mut best: Option<(usize, &[u8])> = None;
        for (pos, cursor) in self.cursors.iter().enumerate() {
            let Some((key, _)) = cursor.current.as_ref() else {
                continue;
            };
            let better = match best {
                Some((_, best_key)) => self.comparator.compare(key, best_key) == Ordering::Less,
                None => true,
            };
            if better {
                best = Some((pos, key.as_slice()));
            }
        }
        best.map(|(pos, _)| pos)
    }
}

impl<C: KeyComparator> RawRecordReader for MergeReader<C> {
    fn next_record(&mut self) -> Result<Option<RawRecord>, RecordError> {
        if let Some(single) = self.single.as_mut() {
            return single.next_record();
        }

        if !self.primed {
            self.prime()?;
        }
        if let Some(pos) = self.pending_advance.take() {
            self.advance(pos)?;
        }

        let Some(pos) = self.smallest() else {
            return Ok(None);
        };
        self.pending_advance = Some(pos);
        Ok(self.cursors[pos].current.clone())
    }

    fn close(&mut self) -> Result<(), RecordError> {
        let mut first_err = None;
        if let Some(single) = self.single.as_mut() {
            if let Err(e) = single.close() {
                first_err.get_or_insert(e);
            }
        }
        for cursor in self.cursors.iter_mut() {
            if let Err(e) = cursor.reader.close() {
                first_err.get_or_insert(e);
            }
        }
        self.cursors.clear();
        self.single = None;
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
