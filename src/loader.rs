//! Reading and writing `Table`s of fixed-width numeric records.
//!
//! A data file holds one record per line, its values separated by commas,
//! whitespace or both. Blank lines are skipped. Every record becomes one
//! `Partition`, with ids assigned consecutively in file order.
//!
//! A dataset split across workers is stored as one file per worker. Each
//! worker loads only its own shard, while [`load_shards`] concatenates all of
//! them into one table for a single-process run.
use crate::error::HarpError;
use crate::table::{Depth, Partition, PartitionId, Table, TableId};
use std::fmt::Display;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use std::str::FromStr;

/// Reads every record from `reader` into a new `Table` with the given
/// `table_id`. The first record gets the id `first_id`.
///
/// ## Errors
/// `HarpError::MalformedRecord` if a record does not hold exactly
/// `vector_size` values or a value does not parse.
pub fn read_table<T, R>(
    reader: R,
    table_id: TableId,
    vector_size: usize,
    first_id: PartitionId,
) -> Result<Table<T>, HarpError>
where
    T: FromStr,
    T::Err: Display,
    R: BufRead,
{
    let mut table = Table::new(table_id);
    let mut next_id = first_id;
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record = parse_record(&line, idx + 1)?;
        if record.is_empty() || record.len() != vector_size {
            return Err(HarpError::MalformedRecord {
                line: idx + 1,
                reason: format!(
                    "expected {} values, found {}",
                    vector_size,
                    record.len()
                ),
            });
        }
        table.add_partition(Partition::new(next_id, record))?;
        next_id += 1;
    }
    Ok(table)
}

/// Opens the file at `path` and reads it with [`read_table`]
pub fn load_table<T, P>(
    path: P,
    table_id: TableId,
    vector_size: usize,
    first_id: PartitionId,
) -> Result<Table<T>, HarpError>
where
    T: FromStr,
    T::Err: Display,
    P: AsRef<Path>,
{
    let file = File::open(path)?;
    read_table(BufReader::new(file), table_id, vector_size, first_id)
}

/// Reads every shard from `readers`, in order, into one `Table`. Ids are
/// consecutive across shards: the first record of a shard gets the number of
/// records read before it.
pub fn read_shards<T, R, I>(
    readers: I,
    table_id: TableId,
    vector_size: usize,
) -> Result<Table<T>, HarpError>
where
    T: FromStr,
    T::Err: Display,
    R: BufRead,
    I: IntoIterator<Item = R>,
{
    let mut table = Table::new(table_id);
    for reader in readers {
        let first_id = table.partition_count() as PartitionId;
        let shard = read_table(reader, table_id, vector_size, first_id)?;
        for p in shard.destroy(Depth::Shallow) {
            table.add_partition(p)?;
        }
    }
    Ok(table)
}

/// Opens every file of `paths` and merges them with [`read_shards`]
pub fn load_shards<T, P, I>(
    paths: I,
    table_id: TableId,
    vector_size: usize,
) -> Result<Table<T>, HarpError>
where
    T: FromStr,
    T::Err: Display,
    P: AsRef<Path>,
    I: IntoIterator<Item = P>,
{
    let readers = paths
        .into_iter()
        .map(|path| File::open(path).map(BufReader::new))
        .collect::<Result<Vec<_>, _>>()?;
    read_shards(readers, table_id, vector_size)
}

/// Writes every partition of `table` as one comma separated record, in id
/// order.
pub fn write_table<T, W>(writer: W, table: &Table<T>) -> Result<(), HarpError>
where
    T: Display,
    W: Write,
{
    let mut writer = BufWriter::new(writer);
    for id in table.ids() {
        if let Some(p) = table.partition(id) {
            let values: Vec<String> =
                p.data().iter().map(|v| v.to_string()).collect();
            writeln!(writer, "{}", values.join(","))?;
        }
    }
    writer.flush()?;
    Ok(())
}

/// Writes `table` to a new file at `path`, replacing any existing file
pub fn save_table<T, P>(path: P, table: &Table<T>) -> Result<(), HarpError>
where
    T: Display,
    P: AsRef<Path>,
{
    write_table(File::create(path)?, table)
}

fn parse_record<T>(line: &str, line_no: usize) -> Result<Vec<T>, HarpError>
where
    T: FromStr,
    T::Err: Display,
{
    line.split(|c: char| c == ',' || c.is_whitespace())
        .filter(|field| !field.is_empty())
        .map(|field| {
            field.parse::<T>().map_err(|e| HarpError::MalformedRecord {
                line: line_no,
                reason: format!("{:?}: {}", field, e),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_read_table() {
        let data = "1.0,2.0\n3.5, 4.5\n\n-1 0\n";
        let table: Table<f64> =
            read_table(Cursor::new(data), 0, 2, 10).unwrap();
        assert_eq!(table.table_id(), 0);
        assert_eq!(table.ids(), vec![10, 11, 12]);
        assert_eq!(table.partition(11).unwrap().data(), &[3.5, 4.5]);
        assert_eq!(table.partition(12).unwrap().data(), &[-1.0, 0.0]);
    }

    #[test]
    fn test_wrong_width() {
        let data = "1,2\n3,4,5\n";
        let res: Result<Table<f64>, _> = read_table(Cursor::new(data), 0, 2, 0);
        assert!(matches!(
            res,
            Err(HarpError::MalformedRecord { line: 2, .. })
        ));
    }

    #[test]
    fn test_bad_value() {
        let data = "1,2\n3,x\n";
        let res: Result<Table<i64>, _> = read_table(Cursor::new(data), 0, 2, 0);
        assert!(matches!(
            res,
            Err(HarpError::MalformedRecord { line: 2, .. })
        ));
    }

    #[test]
    fn test_read_shards_numbers_consecutively() {
        let shards = vec![
            Cursor::new("1,1\n2,2\n"),
            Cursor::new(""),
            Cursor::new("3,3\n4,4\n5,5\n"),
        ];
        let table: Table<f64> = read_shards(shards, 0, 2).unwrap();
        assert_eq!(table.ids(), vec![0, 1, 2, 3, 4]);
        assert_eq!(table.partition(1).unwrap().data(), &[2.0, 2.0]);
        assert_eq!(table.partition(2).unwrap().data(), &[3.0, 3.0]);
        assert_eq!(table.partition(4).unwrap().data(), &[5.0, 5.0]);
    }

    #[test]
    fn test_load_shards_from_files() {
        let dir = std::env::temp_dir()
            .join(format!("harp-loader-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let first = Table::from_partitions(
            0,
            vec![Partition::new(0, vec![1, 2]), Partition::new(1, vec![3, 4])],
        )
        .unwrap();
        let second =
            Table::from_partitions(0, vec![Partition::new(0, vec![5, 6])])
                .unwrap();
        let paths = vec![dir.join("points.0.csv"), dir.join("points.1.csv")];
        save_table(&paths[0], &first).unwrap();
        save_table(&paths[1], &second).unwrap();

        let own: Table<i64> = load_table(&paths[1], 0, 2, 0).unwrap();
        assert_eq!(own, second);
        let all: Table<i64> = load_shards(&paths, 0, 2).unwrap();
        assert_eq!(all.ids(), vec![0, 1, 2]);
        assert_eq!(all.partition(2).unwrap().data(), &[5, 6]);
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_write_then_read() {
        let table = Table::from_partitions(
            1,
            vec![
                Partition::new(1, vec![0.25, -3.0]),
                Partition::new(0, vec![1.0, 2.0]),
            ],
        )
        .unwrap();
        let mut out = Vec::new();
        write_table(&mut out, &table).unwrap();
        assert_eq!(String::from_utf8(out.clone()).unwrap(), "1,2\n0.25,-3\n");
        let back: Table<f64> = read_table(Cursor::new(out), 1, 2, 0).unwrap();
        assert_eq!(back, table);
    }
}
