//! Defines functionality for a `Table`
use crate::error::HarpError;
use crate::table::{Depth, Partition, PartitionId, TableId};
use std::collections::hash_map::Entry;
use std::collections::HashMap;

/// An owned collection of [`Partition`]s keyed by partition id, and the unit
/// of transfer in collective operations.
///
/// ```compile_fail
/// use harp::table::{Depth, Partition, Table};
///
/// let mut table = Table::new(0);
/// table.add_partition(Partition::new(0, vec![1.0])).unwrap();
/// table.destroy(Depth::Deep);
/// // a destroyed table can not be used again
/// table.partition_count();
/// ```
#[derive(Debug, PartialEq)]
pub struct Table<T> {
    /// The id of this table, names the channel it is rotated on
    table_id: TableId,
    /// The owned partitions of this table
    partitions: HashMap<PartitionId, Partition<T>>,
}

impl<T> Table<T> {
    /// Creates a new, empty `Table`
    pub fn new(table_id: TableId) -> Self {
        Table {
            table_id,
            partitions: HashMap::new(),
        }
    }

    /// Creates a new `Table` that owns all of the given `partitions`.
    ///
    /// ## Errors
    /// Returns `HarpError::DuplicatePartitionId` on the first id collision.
    pub fn from_partitions(
        table_id: TableId,
        partitions: impl IntoIterator<Item = Partition<T>>,
    ) -> Result<Self, HarpError> {
        let mut table = Table::new(table_id);
        for p in partitions {
            table.add_partition(p)?;
        }
        Ok(table)
    }

    pub fn table_id(&self) -> TableId {
        self.table_id
    }

    /// Takes ownership of `partition` and stores it under its id.
    ///
    /// ## Errors
    /// If a partition with the same id already exists the table is left
    /// unchanged and `HarpError::DuplicatePartitionId` is returned.
    pub fn add_partition(
        &mut self,
        partition: Partition<T>,
    ) -> Result<(), HarpError> {
        match self.partitions.entry(partition.id()) {
            Entry::Occupied(_) => Err(HarpError::DuplicatePartitionId {
                table_id: self.table_id,
                partition_id: partition.id(),
            }),
            Entry::Vacant(v) => {
                v.insert(partition);
                Ok(())
            }
        }
    }

    /// Removes the partition with the given `id` and returns ownership of it.
    ///
    /// ## Errors
    /// `HarpError::PartitionNotFound` if this table does not own `id`
    pub fn remove_partition(
        &mut self,
        id: PartitionId,
    ) -> Result<Partition<T>, HarpError> {
        self.partitions
            .remove(&id)
            .ok_or(HarpError::PartitionNotFound {
                table_id: self.table_id,
                partition_id: id,
            })
    }

    pub fn partitions(&self) -> &HashMap<PartitionId, Partition<T>> {
        &self.partitions
    }

    /// A read/write view over the partitions. The keys can not be changed
    /// through this view, so the id of every entry keeps matching its
    /// partition.
    pub fn partitions_mut(
        &mut self,
    ) -> impl Iterator<Item = (&PartitionId, &mut Partition<T>)> {
        self.partitions.iter_mut()
    }

    pub fn partition(&self, id: PartitionId) -> Option<&Partition<T>> {
        self.partitions.get(&id)
    }

    pub fn partition_mut(
        &mut self,
        id: PartitionId,
    ) -> Option<&mut Partition<T>> {
        self.partitions.get_mut(&id)
    }

    /// The ids of every owned partition, sorted ascending
    pub fn ids(&self) -> Vec<PartitionId> {
        let mut ids: Vec<PartitionId> =
            self.partitions.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn partition_count(&self) -> usize {
        self.partitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.partitions.is_empty()
    }

    /// Consumes this `Table`. With `Depth::Deep` every partition buffer is
    /// dropped and an empty `Vec` is returned, with `Depth::Shallow` the
    /// partitions are returned (in id order) so that a new owner can adopt
    /// them.
    pub fn destroy(mut self, depth: Depth) -> Vec<Partition<T>> {
        match depth {
            Depth::Deep => Vec::new(),
            Depth::Shallow => self.take_partitions(),
        }
    }

    /// Moves every partition out of this table, in id order
    pub(crate) fn take_partitions(&mut self) -> Vec<Partition<T>> {
        let mut taken: Vec<Partition<T>> =
            self.partitions.drain().map(|(_, p)| p).collect();
        taken.sort_unstable_by_key(|p| p.id());
        taken
    }

    /// Replaces the contents of this table with `partitions`. On a duplicate
    /// id the table is left empty.
    pub(crate) fn install_partitions(
        &mut self,
        partitions: Vec<Partition<T>>,
    ) -> Result<(), HarpError> {
        self.partitions.clear();
        self.partitions.reserve(partitions.len());
        for p in partitions {
            if let Err(e) = self.add_partition(p) {
                self.partitions.clear();
                return Err(e);
            }
        }
        Ok(())
    }
}

impl<T: Clone> Table<T> {
    /// Sets every element of every partition to `value`. The partition count
    /// and ids are unchanged.
    pub fn reset(&mut self, value: T) {
        for p in self.partitions.values_mut() {
            p.fill(value.clone());
        }
    }

    /// Creates an independent copy of this table and all its partitions
    pub fn deep_copy(&self) -> Self {
        Table {
            table_id: self.table_id,
            partitions: self
                .partitions
                .iter()
                .map(|(id, p)| (*id, p.deep_copy()))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn init() -> Table<f64> {
        Table::from_partitions(
            1,
            vec![
                Partition::new(0, vec![1.0, 2.0]),
                Partition::new(1, vec![3.0, 4.0]),
                Partition::new(2, vec![5.0, 6.0]),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_add_and_get() {
        let table = init();
        assert_eq!(table.table_id(), 1);
        assert_eq!(table.partition_count(), 3);
        assert_eq!(table.partition(1).unwrap().data(), &[3.0, 4.0]);
        assert_eq!(table.ids(), vec![0, 1, 2]);
        assert!(table.partition(3).is_none());
    }

    #[test]
    fn test_duplicate_id_leaves_table_unchanged() {
        let mut table = init();
        let before = table.deep_copy();
        let res = table.add_partition(Partition::new(1, vec![9.0, 9.0]));
        match res {
            Err(HarpError::DuplicatePartitionId {
                table_id: 1,
                partition_id: 1,
            }) => (),
            other => panic!("expected a duplicate id error, got {:?}", other),
        }
        assert_eq!(table.partition_count(), 3);
        assert_eq!(table, before);
    }

    #[test]
    fn test_from_partitions_rejects_duplicates() {
        let res = Table::from_partitions(
            0,
            vec![Partition::new(4, vec![1]), Partition::new(4, vec![2])],
        );
        assert!(matches!(
            res,
            Err(HarpError::DuplicatePartitionId { partition_id: 4, .. })
        ));
    }

    #[test]
    fn test_remove_partition() {
        let mut table = init();
        let p = table.remove_partition(2).unwrap();
        assert_eq!(p.id(), 2);
        assert_eq!(p.data(), &[5.0, 6.0]);
        assert_eq!(table.partition_count(), 2);
        assert!(matches!(
            table.remove_partition(2),
            Err(HarpError::PartitionNotFound {
                table_id: 1,
                partition_id: 2
            })
        ));
    }

    #[test]
    fn test_move_between_tables() {
        let mut src = init();
        let mut dst = Table::new(7);
        let p = src.remove_partition(0).unwrap();
        dst.add_partition(p).unwrap();
        assert_eq!(src.ids(), vec![1, 2]);
        assert_eq!(dst.ids(), vec![0]);
        assert_eq!(dst.partition(0).unwrap().data(), &[1.0, 2.0]);
    }

    #[test]
    fn test_reset() {
        let mut table = init();
        table.reset(0.0);
        assert_eq!(table.ids(), vec![0, 1, 2]);
        for p in table.partitions().values() {
            assert_eq!(p.size(), 2);
            assert!(p.data().iter().all(|x| *x == 0.0));
        }
    }

    #[test]
    fn test_partitions_mut() {
        let mut table = init();
        for (_, p) in table.partitions_mut() {
            p.data_mut()[0] += 10.0;
        }
        assert_eq!(table.partition(2).unwrap().data(), &[15.0, 6.0]);
    }

    #[test]
    fn test_destroy_deep() {
        let table = init();
        assert!(table.destroy(Depth::Deep).is_empty());
    }

    #[test]
    fn test_destroy_shallow_hands_back_partitions() {
        let table = init();
        let partitions = table.destroy(Depth::Shallow);
        let ids: Vec<PartitionId> = partitions.iter().map(|p| p.id()).collect();
        assert_eq!(ids, vec![0, 1, 2]);
        let adopted = Table::from_partitions(5, partitions).unwrap();
        assert_eq!(adopted.partition(2).unwrap().data(), &[5.0, 6.0]);
    }

    #[test]
    fn test_take_and_install() {
        let mut table = init();
        let taken = table.take_partitions();
        assert!(table.is_empty());
        assert_eq!(taken.len(), 3);
        table.install_partitions(taken).unwrap();
        assert_eq!(table, init());
        let dup =
            vec![Partition::new(0, vec![0.0]), Partition::new(0, vec![1.0])];
        assert!(table.install_partitions(dup).is_err());
        assert!(table.is_empty());
    }
}
