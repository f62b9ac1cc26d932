//! Expression persistence.
//!
//! A saved expression is a self-describing document attached to the
//! output array's own metadata: the formula string, a storage reference
//! per operand, and any mask branch values. Reopening re-parses the
//! formula against the declared operand names and the function whitelist
//! before anything is evaluated, so a tampered artifact fails closed.
//!
//! User-defined functions are refused outright: an artifact must never
//! carry executable payloads.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::dtype::Scalar;
use crate::errors::{
    FormulaParseSnafu, MissingLocationSnafu, NoArtifactSnafu, Result, UdfNotSerializableSnafu,
    UnresolvableRemoteSnafu,
};
use crate::expr::parse_formula;
use crate::lazy::{Expression, LazyArray, MaskArgs, MaskBranch};
use crate::operand::Operand;
use crate::store::{ChunkStore, ChunkedArray, DiskStore, Location};

#[derive(Debug, Serialize, Deserialize)]
struct ArtifactDoc {
    expression: String,
    operands: BTreeMap<String, OperandDoc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    mask: Option<MaskDoc>,
}

#[derive(Debug, Serialize, Deserialize)]
struct OperandDoc {
    path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    transport_base: Option<String>,
}

impl OperandDoc {
    fn from_location(loc: &Location) -> OperandDoc {
        match loc {
            Location::Local { path } => OperandDoc {
                path: path.clone(),
                transport_base: None,
            },
            Location::Remote {
                path,
                transport_base,
            } => OperandDoc {
                path: path.clone(),
                transport_base: Some(transport_base.clone()),
            },
        }
    }

    fn location(&self) -> Location {
        match &self.transport_base {
            None => Location::Local {
                path: self.path.clone(),
            },
            Some(base) => Location::Remote {
                path: self.path.clone(),
                transport_base: base.clone(),
            },
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct MaskDoc {
    x: MaskValueDoc,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    y: Option<MaskValueDoc>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
enum MaskValueDoc {
    Scalar { value: Scalar },
    Array(OperandDoc),
}

/// Opens operand stores referenced by a persisted expression. The
/// default [`LocalResolver`] handles filesystem paths; remote transports
/// plug in here.
pub trait StoreResolver {
    fn open(&self, location: &Location) -> Result<Arc<dyn ChunkStore>>;
}

pub struct LocalResolver;

impl StoreResolver for LocalResolver {
    fn open(&self, location: &Location) -> Result<Arc<dyn ChunkStore>> {
        match location {
            Location::Local { path } => Ok(Arc::new(DiskStore::open(path)?)),
            Location::Remote {
                path,
                transport_base,
            } => UnresolvableRemoteSnafu {
                path: path.clone(),
                base: transport_base.clone(),
            }
            .fail(),
        }
    }
}

/// Serialize an expression into the metadata of `out` (its persisted
/// output array). Every operand must be store-backed with a stable
/// location; mask branches must be scalars or located stores.
pub fn save_expression(lazy: &LazyArray, out: &ChunkedArray) -> Result<()> {
    let LazyArray::Expression(expr) = lazy else {
        return UdfNotSerializableSnafu.fail();
    };

    let mut operands = BTreeMap::new();
    for (slot, op) in expr.operands.iter().enumerate() {
        let name = format!("o{slot}");
        let loc = operand_location(op, &name)?;
        operands.insert(name, OperandDoc::from_location(&loc));
    }

    let mask = match &expr.mask {
        None => None,
        Some(args) => Some(MaskDoc {
            x: mask_value_doc(&args.x, "mask.x")?,
            y: match &args.y {
                Some(y) => Some(mask_value_doc(y, "mask.y")?),
                None => None,
            },
        }),
    };

    let doc = ArtifactDoc {
        expression: expr.formula(),
        operands,
        mask,
    };
    debug!(expression = %doc.expression, "saving expression artifact");
    out.store().put_artifact(&serde_json::to_string(&doc)?)
}

fn operand_location(op: &Operand, name: &str) -> Result<Location> {
    match op {
        Operand::Chunked(c) => match c.location() {
            Some(loc) => Ok(loc),
            None => MissingLocationSnafu {
                name: name.to_string(),
            }
            .fail(),
        },
        _ => MissingLocationSnafu {
            name: name.to_string(),
        }
        .fail(),
    }
}

fn mask_value_doc(branch: &MaskBranch, name: &str) -> Result<MaskValueDoc> {
    match branch {
        MaskBranch::Value(Operand::Scalar(s)) => Ok(MaskValueDoc::Scalar { value: *s }),
        MaskBranch::Value(op) => {
            let loc = operand_location(op, name)?;
            Ok(MaskValueDoc::Array(OperandDoc::from_location(&loc)))
        }
        MaskBranch::Expr(_) => MissingLocationSnafu {
            name: name.to_string(),
        }
        .fail(),
    }
}

/// Reopen a persisted expression from the array directory it was saved
/// with, resolving operand stores locally.
pub fn open_expression(dir: impl AsRef<Path>) -> Result<LazyArray> {
    open_expression_with(dir, &LocalResolver)
}

pub fn open_expression_with(
    dir: impl AsRef<Path>,
    resolver: &dyn StoreResolver,
) -> Result<LazyArray> {
    let dir = dir.as_ref();
    let store = DiskStore::open(dir)?;
    let Some(raw) = store.get_artifact()? else {
        return NoArtifactSnafu {
            path: dir.to_string_lossy().into_owned(),
        }
        .fail();
    };
    let doc: ArtifactDoc = serde_json::from_str(&raw)?;

    // Slot-ordered operand table: declared names are o0..oN.
    let mut slots: Vec<(usize, &String, &OperandDoc)> = Vec::with_capacity(doc.operands.len());
    for (name, op_doc) in &doc.operands {
        let slot = name
            .strip_prefix('o')
            .and_then(|n| n.parse::<usize>().ok())
            .filter(|&n| n < doc.operands.len());
        match slot {
            Some(slot) => slots.push((slot, name, op_doc)),
            None => {
                return FormulaParseSnafu {
                    pos: 0usize,
                    reason: format!("bad operand name '{name}' in artifact"),
                }
                .fail()
            }
        }
    }
    slots.sort_by_key(|(slot, _, _)| *slot);
    let names: Vec<&str> = slots.iter().map(|(_, name, _)| name.as_str()).collect();

    // Compile against the declared names before touching any data. This
    // rejects unknown identifiers and disallowed functions.
    let ast = parse_formula(&doc.expression, &names)?;
    ast.validate_slots(names.len())?;
    debug!(expression = %doc.expression, operands = names.len(), "opened expression artifact");

    let mut operands = Vec::with_capacity(slots.len());
    for (_, _, op_doc) in &slots {
        let opened = resolver.open(&op_doc.location())?;
        operands.push(Operand::Chunked(ChunkedArray::new(opened)));
    }

    let mask = match doc.mask {
        None => None,
        Some(m) => Some(MaskArgs {
            x: open_mask_value(m.x, resolver)?,
            y: match m.y {
                Some(y) => Some(open_mask_value(y, resolver)?),
                None => None,
            },
        }),
    };

    let mut expr = Expression::from_parts(ast, operands);
    expr.mask = mask;
    Ok(LazyArray::Expression(expr))
}

fn open_mask_value(doc: MaskValueDoc, resolver: &dyn StoreResolver) -> Result<MaskBranch> {
    Ok(match doc {
        MaskValueDoc::Scalar { value } => MaskBranch::Value(Operand::Scalar(value)),
        MaskValueDoc::Array(op_doc) => {
            let opened = resolver.open(&op_doc.location())?;
            MaskBranch::Value(Operand::Chunked(ChunkedArray::new(opened)))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dense::Dense;
    use crate::dtype::DType;
    use crate::errors::EngineError;
    use crate::lazy::lazy;
    use crate::store::ChunkMeta;

    fn disk_ramp(dir: &Path, shape: &[usize], chunks: &[usize], scale: f64) -> Arc<ChunkedArray> {
        let n: usize = shape.iter().product();
        let d = Dense::from_f64(
            shape.to_vec(),
            (0..n).map(|i| i as f64 * scale - 2.0).collect(),
        )
        .unwrap();
        ChunkedArray::to_disk(dir, &d, Some(chunks.to_vec()), None).unwrap()
    }

    fn out_array(dir: &Path, shape: &[usize], chunks: &[usize]) -> Arc<ChunkedArray> {
        let meta = ChunkMeta::new(
            shape.to_vec(),
            chunks.to_vec(),
            chunks.to_vec(),
            DType::Float64,
        )
        .unwrap();
        ChunkedArray::new(Arc::new(DiskStore::create(dir, meta).unwrap()))
    }

    #[test]
    fn test_roundtrip_preserves_result() {
        let tmp = tempfile::tempdir().unwrap();
        let a = disk_ramp(&tmp.path().join("a"), &[8, 6], &[4, 3], 0.5);
        let b = disk_ramp(&tmp.path().join("b"), &[8, 6], &[4, 3], 1.5);
        let out = out_array(&tmp.path().join("out"), &[8, 6], &[4, 3]);

        let expr = lazy(&a) * 2.0 + lazy(&b).sin();
        let expected = expr.eval().unwrap().into_dense().unwrap();

        save_expression(&expr, &out).unwrap();
        let reopened = open_expression(tmp.path().join("out")).unwrap();
        let again = reopened.eval().unwrap().into_dense().unwrap();
        assert_eq!(expected, again);
        assert_eq!(
            reopened.as_expression().unwrap().formula(),
            expr.as_expression().unwrap().formula()
        );
    }

    #[test]
    fn test_mask_roundtrip() {
        let tmp = tempfile::tempdir().unwrap();
        let a = disk_ramp(&tmp.path().join("a"), &[6], &[3], 1.0);
        let out = out_array(&tmp.path().join("out"), &[6], &[3]);

        let expr = lazy(&a).gt(0.0).where_(&a, 0.0).unwrap();
        let expected = expr.eval().unwrap().into_dense().unwrap();

        save_expression(&expr, &out).unwrap();
        let reopened = open_expression(tmp.path().join("out")).unwrap();
        assert_eq!(reopened.eval().unwrap().into_dense().unwrap(), expected);
    }

    #[test]
    fn test_memory_operand_refused() {
        let tmp = tempfile::tempdir().unwrap();
        let out = out_array(&tmp.path().join("out"), &[4], &[2]);
        let mem = Dense::from_f64(vec![4], vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        let expr = lazy(mem) + 1.0;
        assert!(matches!(
            save_expression(&expr, &out).unwrap_err(),
            EngineError::MissingLocation { .. }
        ));
    }

    #[test]
    fn test_udf_refused() {
        let tmp = tempfile::tempdir().unwrap();
        let a = disk_ramp(&tmp.path().join("a"), &[4], &[2], 1.0);
        let out = out_array(&tmp.path().join("out"), &[4], &[2]);
        let udf = crate::lazy::LazyArray::udf(
            |_, _, _| Ok(()),
            vec![crate::lazy::LazyInput::from(&a)],
            DType::Float64,
        );
        assert!(matches!(
            save_expression(&udf, &out).unwrap_err(),
            EngineError::UdfNotSerializable
        ));
    }

    #[test]
    fn test_tampered_formula_rejected_before_eval() {
        let tmp = tempfile::tempdir().unwrap();
        let a = disk_ramp(&tmp.path().join("a"), &[4], &[2], 1.0);
        let out = out_array(&tmp.path().join("out"), &[4], &[2]);
        save_expression(&(lazy(&a) + 1.0), &out).unwrap();

        // Rewrite the artifact with an identifier outside the declared set
        // and with a disallowed call; both must fail at open.
        let store = DiskStore::open(tmp.path().join("out")).unwrap();
        let doc = store.get_artifact().unwrap().unwrap();

        let evil = doc.replace("(o0 + 1.0)", "(o0 + secret)");
        store.put_artifact(&evil).unwrap();
        assert!(matches!(
            open_expression(tmp.path().join("out")).unwrap_err(),
            EngineError::UnknownIdentifier { .. }
        ));

        let evil = doc.replace("(o0 + 1.0)", "system(o0)");
        store.put_artifact(&evil).unwrap();
        assert!(matches!(
            open_expression(tmp.path().join("out")).unwrap_err(),
            EngineError::UnknownFunction { .. }
        ));
    }

    #[test]
    fn test_missing_artifact() {
        let tmp = tempfile::tempdir().unwrap();
        let _ = disk_ramp(&tmp.path().join("plain"), &[4], &[2], 1.0);
        assert!(matches!(
            open_expression(tmp.path().join("plain")).unwrap_err(),
            EngineError::NoArtifact { .. }
        ));
    }

    #[test]
    fn test_remote_descriptor_roundtrips() {
        let doc = OperandDoc {
            path: "bucket/array".to_string(),
            transport_base: Some("https://data.example.org".to_string()),
        };
        let loc = doc.location();
        assert!(matches!(loc, Location::Remote { .. }));
        let back = OperandDoc::from_location(&loc);
        assert_eq!(back.path, "bucket/array");
        assert_eq!(back.transport_base.as_deref(), Some("https://data.example.org"));
        // The default resolver refuses remote operands cleanly.
        assert!(matches!(
            LocalResolver.open(&loc).unwrap_err(),
            EngineError::UnresolvableRemote { .. }
        ));
    }
}
