//! Company → department → unit key tree
//!
//! Every `(company, department)` pair is an independent derivation task:
//! one department key from the company's root secret, then one unit key per
//! unit from that department key. Tasks run on a bounded rayon pool and their
//! unit-key slices are merged by position, so the output is always in
//! `(company, department, unit)` row-major order regardless of scheduling.

use rayon::prelude::*;
use std::time::Instant;
use tracing::{debug, info};

use keyfan_core::{
    DerivationStats, HierarchyShape, KeyPath, KeyfanError, KeyfanResult, NodeParameters,
    RootSecret,
};

use crate::kdf::{CounterModeKdf, KeyedPrf};
use crate::keys::DerivedKey;

/// Derives the full leaf-key sequence of a hierarchy.
#[derive(Debug, Clone)]
pub struct KeyTree<P> {
    kdf: CounterModeKdf<P>,
    workers: usize,
}

impl<P: KeyedPrf> KeyTree<P> {
    /// `workers` is the derivation pool size (clamped to at least 1).
    pub fn new(kdf: CounterModeKdf<P>, workers: usize) -> Self {
        Self {
            kdf,
            workers: workers.max(1),
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Derive all `companies * departments * units` leaf keys in row-major
    /// order.
    ///
    /// All inputs are validated before any derivation starts. Any error
    /// aborts the run; no partial key set is returned.
    pub fn derive_all(
        &self,
        root_secrets: &[RootSecret],
        department_params: &[NodeParameters],
        unit_params: &[NodeParameters],
        shape: HierarchyShape,
    ) -> KeyfanResult<Vec<DerivedKey>> {
        self.derive_all_timed(root_secrets, department_params, unit_params, shape)
            .map(|(keys, _)| keys)
    }

    /// [`derive_all`](Self::derive_all), also returning timing.
    pub fn derive_all_timed(
        &self,
        root_secrets: &[RootSecret],
        department_params: &[NodeParameters],
        unit_params: &[NodeParameters],
        shape: HierarchyShape,
    ) -> KeyfanResult<(Vec<DerivedKey>, DerivationStats)> {
        validate_inputs(root_secrets, department_params, unit_params, shape)?;

        let start = Instant::now();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.workers)
            .thread_name(|i| format!("keyfan-derive-{i}"))
            .build()
            .map_err(|e| KeyfanError::Other(anyhow::anyhow!("building derivation pool: {e}")))?;

        let units = &unit_params[..shape.units];
        let slices: Vec<Vec<DerivedKey>> = pool.install(|| {
            (0..shape.department_count())
                .into_par_iter()
                .map(|task| {
                    let company = task / shape.departments;
                    let department = task % shape.departments;
                    self.derive_department(
                        &root_secrets[company],
                        &department_params[department],
                        units,
                        task * shape.units,
                    )
                })
                .collect::<KeyfanResult<Vec<_>>>()
        })?;

        let keys: Vec<DerivedKey> = slices.into_iter().flatten().collect();
        if keys.len() != shape.leaf_count() {
            return Err(KeyfanError::Other(anyhow::anyhow!(
                "merged {} keys, expected {}",
                keys.len(),
                shape.leaf_count()
            )));
        }

        let stats = DerivationStats {
            keys: keys.len(),
            workers: self.workers,
            elapsed: start.elapsed(),
        };
        info!(
            keys = stats.keys,
            workers = stats.workers,
            prf = self.kdf.prf().name(),
            elapsed_ms = stats.elapsed.as_millis() as u64,
            "derived leaf keys"
        );
        Ok((keys, stats))
    }

    /// Derive the single leaf key at `path` without walking the whole tree.
    pub fn derive_leaf(
        &self,
        root_secrets: &[RootSecret],
        department_params: &[NodeParameters],
        unit_params: &[NodeParameters],
        shape: HierarchyShape,
        path: KeyPath,
    ) -> KeyfanResult<DerivedKey> {
        validate_inputs(root_secrets, department_params, unit_params, shape)?;
        let index = shape.flat_index(path).ok_or_else(|| {
            KeyfanError::InvalidInput(format!("key path {path} is outside the hierarchy"))
        })?;

        let department_key = self.kdf.derive_node(
            root_secrets[path.company].expose(),
            &department_params[path.department],
        )?;
        let department_key = DerivedKey::from_slice(index, &department_key)?;
        let unit_key = self
            .kdf
            .derive_node(department_key.as_bytes(), &unit_params[path.unit])?;
        DerivedKey::from_slice(index, &unit_key)
    }

    /// One task: a department key and all of its unit keys.
    fn derive_department(
        &self,
        root: &RootSecret,
        department: &NodeParameters,
        units: &[NodeParameters],
        base_index: usize,
    ) -> KeyfanResult<Vec<DerivedKey>> {
        let department_key = self.kdf.derive_node(root.expose(), department)?;
        let department_key = DerivedKey::from_slice(base_index, &department_key)?;

        let keys = units
            .iter()
            .enumerate()
            .map(|(k, unit)| {
                let bytes = self.kdf.derive_node(department_key.as_bytes(), unit)?;
                DerivedKey::from_slice(base_index + k, &bytes)
            })
            .collect::<KeyfanResult<Vec<_>>>()?;

        debug!(base_index, units = keys.len(), "department derived");
        Ok(keys)
    }
}

fn validate_inputs(
    root_secrets: &[RootSecret],
    department_params: &[NodeParameters],
    unit_params: &[NodeParameters],
    shape: HierarchyShape,
) -> KeyfanResult<()> {
    shape.validate()?;

    let tables = [
        ("root secret", root_secrets.len(), shape.companies),
        ("department", department_params.len(), shape.departments),
        ("unit", unit_params.len(), shape.units),
    ];
    for (table, len, needed) in tables {
        if len < needed {
            return Err(KeyfanError::IndexOutOfRange {
                table,
                index: needed - 1,
                len,
            });
        }
    }

    if let Some(company) = root_secrets[..shape.companies]
        .iter()
        .position(RootSecret::is_empty)
    {
        return Err(KeyfanError::InvalidInput(format!(
            "root secret for company {company} is empty"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kdf::HmacSha256;
    use keyfan_core::config::{CounterLocation, LabelTables};
    use zeroize::Zeroizing;

    fn tree(workers: usize) -> KeyTree<HmacSha256> {
        KeyTree::new(
            CounterModeKdf::new(HmacSha256, CounterLocation::BeforeFixed),
            workers,
        )
    }

    fn secrets(n: usize) -> Vec<RootSecret> {
        (0..n)
            .map(|i| RootSecret::from(format!("company-secret-{i:02}").as_str()))
            .collect()
    }

    #[test]
    fn short_unit_table_is_out_of_range() {
        let tables = LabelTables::placeholder(3, 2);
        let shape = HierarchyShape::new(1, 3, 4).unwrap();
        let err = tree(2)
            .derive_all(&secrets(1), &tables.departments, &tables.units, shape)
            .unwrap_err();
        assert!(matches!(
            err,
            KeyfanError::IndexOutOfRange {
                table: "unit",
                index: 3,
                len: 2
            }
        ));
    }

    #[test]
    fn short_department_table_is_out_of_range() {
        let tables = LabelTables::placeholder(1, 4);
        let shape = HierarchyShape::new(1, 3, 4).unwrap();
        let err = tree(2)
            .derive_all(&secrets(1), &tables.departments, &tables.units, shape)
            .unwrap_err();
        assert!(matches!(
            err,
            KeyfanError::IndexOutOfRange {
                table: "department",
                ..
            }
        ));
    }

    #[test]
    fn missing_root_secret_is_out_of_range() {
        let tables = LabelTables::placeholder(3, 4);
        let shape = HierarchyShape::new(5, 3, 4).unwrap();
        let err = tree(2)
            .derive_all(&secrets(4), &tables.departments, &tables.units, shape)
            .unwrap_err();
        assert!(matches!(
            err,
            KeyfanError::IndexOutOfRange {
                table: "root secret",
                index: 4,
                len: 4
            }
        ));
    }

    #[test]
    fn empty_root_secret_is_invalid_input() {
        let tables = LabelTables::placeholder(1, 1);
        let shape = HierarchyShape::new(2, 1, 1).unwrap();
        let roots = vec![RootSecret::from("ok"), RootSecret::new(Vec::new())];
        let err = tree(1)
            .derive_all(&roots, &tables.departments, &tables.units, shape)
            .unwrap_err();
        assert!(matches!(err, KeyfanError::InvalidInput(_)));
    }

    /// Claims 32-byte blocks but returns 16.
    struct ShortBlockPrf;

    impl KeyedPrf for ShortBlockPrf {
        fn name(&self) -> &'static str {
            "short-block"
        }

        fn output_len(&self) -> usize {
            32
        }

        fn compute(&self, key: &[u8], parts: &[&[u8]]) -> KeyfanResult<Zeroizing<Vec<u8>>> {
            let mut block = HmacSha256.compute(key, parts)?;
            block.truncate(16);
            Ok(block)
        }
    }

    #[test]
    fn short_prf_output_is_a_key_length_mismatch() {
        let tables = LabelTables::placeholder(1, 1);
        let shape = HierarchyShape::new(1, 1, 1).unwrap();
        let tree = KeyTree::new(
            CounterModeKdf::new(ShortBlockPrf, CounterLocation::BeforeFixed),
            1,
        );
        let err = tree
            .derive_all(&secrets(1), &tables.departments, &tables.units, shape)
            .unwrap_err();
        assert!(matches!(
            err,
            KeyfanError::KeyLengthMismatch {
                index: 0,
                expected: 32,
                actual: 16
            }
        ));
    }

    #[test]
    fn longer_tables_are_allowed() {
        let tables = LabelTables::placeholder(26, 1000);
        let shape = HierarchyShape::new(2, 2, 3).unwrap();
        let keys = tree(2)
            .derive_all(&secrets(20), &tables.departments, &tables.units, shape)
            .unwrap();
        assert_eq!(keys.len(), 12);
    }

    #[test]
    fn derive_leaf_matches_sequence() {
        let tables = LabelTables::placeholder(3, 4);
        let shape = HierarchyShape::new(2, 3, 4).unwrap();
        let t = tree(3);
        let (keys, stats) = t
            .derive_all_timed(&secrets(2), &tables.departments, &tables.units, shape)
            .unwrap();
        assert_eq!(stats.keys, 24);
        assert_eq!(stats.workers, 3);

        let path = KeyPath::new(1, 2, 3);
        let leaf = t
            .derive_leaf(&secrets(2), &tables.departments, &tables.units, shape, path)
            .unwrap();
        let idx = shape.flat_index(path).unwrap();
        assert_eq!(leaf.as_bytes(), keys[idx].as_bytes());

        assert!(t
            .derive_leaf(
                &secrets(2),
                &tables.departments,
                &tables.units,
                shape,
                KeyPath::new(2, 0, 0)
            )
            .is_err());
    }
}
