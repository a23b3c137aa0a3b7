//! Funciones de reduce que vienen con el sistema, elegidas por nombre.

use crate::reduce::{Emitter, ReduceError};

/// Callback de reduce: se invoca una vez por clave con todos sus valores.
pub trait Reducer: Send {
    fn reduce(
        &mut self,
        key: &[u8],
        values: &mut dyn Iterator<Item = Vec<u8>>,
        out: &mut dyn Emitter,
    ) -> Result<(), ReduceError>;
}

impl<F> Reducer for F
where
    F: FnMut(&[u8], &mut dyn Iterator<Item = Vec<u8>>, &mut dyn Emitter) -> Result<(), ReduceError>
        + Send,
{
    fn reduce(
        &mut self,
        key: &[u8],
        values: &mut dyn Iterator<Item = Vec<u8>>,
        out: &mut dyn Emitter,
    ) -> Result<(), ReduceError> {
        self(key, values, out)
    }
}

fn parse_i64(key: &[u8], raw: &[u8]) -> Result<i64, ReduceError> {
    std::str::from_utf8(raw)
        .ok()
        .and_then(|s| s.trim().parse::<i64>().ok())
        .ok_or_else(|| ReduceError::InvalidValue {
            key: String::from_utf8_lossy(key).to_string(),
            value: String::from_utf8_lossy(raw).to_string(),
        })
}

/// Suma valores enteros en texto decimal ("3\n", " 7").
pub struct SumReducer;

impl Reducer for SumReducer {
    fn reduce(
        &mut self,
        key: &[u8],
        values: &mut dyn Iterator<Item = Vec<u8>>,
        out: &mut dyn Emitter,
    ) -> Result<(), ReduceError> {
        let mut total: i64 = 0;
        for v in values {
            total = total.checked_add(parse_i64(key, &v)?).ok_or_else(|| {
                ReduceError::Reducer(format!(
                    "la suma de la clave {:?} desborda i64",
                    String::from_utf8_lossy(key)
                ))
            })?;
        }
        out.emit(key, total.to_string().as_bytes())
    }
}

/// Cuenta cuántos valores tiene cada clave.
pub struct CountReducer;

impl Reducer for CountReducer {
    fn reduce(
        &mut self,
        key: &[u8],
        values: &mut dyn Iterator<Item = Vec<u8>>,
        out: &mut dyn Emitter,
    ) -> Result<(), ReduceError> {
        let n = values.count();
        out.emit(key, n.to_string().as_bytes())
    }
}

/// Une los valores con `,` en el orden en que llegan.
pub struct ConcatReducer;

impl Reducer for ConcatReducer {
    fn reduce(
        &mut self,
        key: &[u8],
        values: &mut dyn Iterator<Item = Vec<u8>>,
        out: &mut dyn Emitter,
    ) -> Result<(), ReduceError> {
        let joined: Vec<Vec<u8>> = values.collect();
        out.emit(key, &joined.join(&b","[..]))
    }
}

/// Reemite cada valor tal cual (útil para ordenar/mergear sin agregar).
pub struct IdentityReducer;

impl Reducer for IdentityReducer {
    fn reduce(
        &mut self,
        key: &[u8],
        values: &mut dyn Iterator<Item = Vec<u8>>,
        out: &mut dyn Emitter,
    ) -> Result<(), ReduceError> {
        for v in values {
            out.emit(key, &v)?;
        }
        Ok(())
    }
}

pub fn reducer_by_name(name: &str) -> Result<Box<dyn Reducer>, ReduceError> {
    match name {
        "sum" => Ok(Box::new(SumReducer)),
        "count" => Ok(Box::new(CountReducer)),
        "concat" => Ok(Box::new(ConcatReducer)),
        "identity" => Ok(Box::new(IdentityReducer)),
        other => Err(ReduceError::UnknownReducer(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct VecEmitter(Vec<(String, String)>);

    impl Emitter for VecEmitter {
        fn emit(&mut self, key: &[u8], value: &[u8]) -> Result<(), ReduceError> {
            self.0.push((
                String::from_utf8_lossy(key).to_string(),
                String::from_utf8_lossy(value).to_string(),
            ));
            Ok(())
        }
    }

    fn run(reducer: &mut dyn Reducer, key: &str, values: &[&str]) -> Vec<(String, String)> {
        let mut out = VecEmitter::default();
        let mut it = values.iter().map(|v| v.as_bytes().to_vec());
        reducer.reduce(key.as_bytes(), &mut it, &mut out).unwrap();
        out.0
    }

    #[test]
    fn sum_ignora_espacios_y_saltos_de_linea() {
        let out = run(&mut SumReducer, "total", &["3\n", "7\n"]);
        assert_eq!(out, vec![("total".to_string(), "10".to_string())]);
    }

    #[test]
    fn sum_con_valor_no_numerico_es_error() {
        let mut out = VecEmitter::default();
        let mut it = vec![b"x".to_vec()].into_iter();
        let res = SumReducer.reduce(b"k", &mut it, &mut out);
        assert!(matches!(res, Err(ReduceError::InvalidValue { .. })));
        assert!(out.0.is_empty());
    }

    #[test]
    fn sum_que_desborda_es_error_y_no_panic() {
        let mut out = VecEmitter::default();
        let max = i64::MAX.to_string();
        let mut it = vec![max.into_bytes(), b"1".to_vec()].into_iter();
        let res = SumReducer.reduce(b"k", &mut it, &mut out);
        assert!(matches!(res, Err(ReduceError::Reducer(ref m)) if m.contains("desborda")));
        assert!(out.0.is_empty());

        // los negativos grandes también
        let min = i64::MIN.to_string();
        let out = run(&mut SumReducer, "k", &[min.as_str(), "5"]);
        assert_eq!(out[0].1, (i64::MIN + 5).to_string());
    }

    #[test]
    fn count_concat_e_identity() {
        assert_eq!(run(&mut CountReducer, "a", &["x", "y", "z"])[0].1, "3");
        assert_eq!(run(&mut ConcatReducer, "a", &["x", "y"])[0].1, "x,y");
        assert_eq!(run(&mut IdentityReducer, "a", &["x", "y"]).len(), 2);
    }

    #[test]
    fn reducer_by_name_rechaza_nombres_desconocidos() {
        assert!(reducer_by_name("sum").is_ok());
        assert!(matches!(
            reducer_by_name("avg"),
            Err(ReduceError::UnknownReducer(_))
        ));
    }
}
