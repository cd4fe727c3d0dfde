use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use relgen_config::CsvExportSpec;
use relgen_core::{FieldPath, NULL_CELL, Record, ScalarKind, Value};
use tracing::warn;

use crate::errors::GenerationError;

/// Rows and bytes written by one export.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CsvExportSummary {
    pub rows: u64,
    pub bytes: u64,
}

/// Write records as CSV.
///
/// With `flatten_objects` every leaf becomes a `parent.child.leaf` column;
/// otherwise nested objects are written as JSON text in one column. Columns
/// follow first appearance across the records. Null and absent leaves are
/// written as [`NULL_CELL`].
pub fn write_records_csv<'a, I>(
    path: &Path,
    records: I,
    options: &CsvExportSpec,
) -> Result<CsvExportSummary, GenerationError>
where
    I: IntoIterator<Item = &'a Record>,
{
    let rows: Vec<Vec<(String, Value)>> = records
        .into_iter()
        .map(|record| {
            if options.flatten_objects {
                record.flatten()
            } else {
                record
                    .iter()
                    .map(|(name, value)| (name.to_string(), value.clone()))
                    .collect()
            }
        })
        .collect();

    let mut header: Vec<String> = Vec::new();
    for row in &rows {
        for (name, _) in row {
            if !header.contains(name) {
                header.push(name.clone());
            }
        }
    }

    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    let writer = BufWriter::new(File::create(path)?);
    let counting = CountingWriter::new(writer);
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .delimiter(options.delimiter)
        .from_writer(counting);

    if options.include_headers {
        writer.write_record(&header)?;
    }
    for row in &rows {
        let cells: Vec<String> = header
            .iter()
            .map(|column| {
                row.iter()
                    .find(|(name, _)| name == column)
                    .map(|(_, value)| value.to_cell())
                    .unwrap_or_else(|| NULL_CELL.to_string())
            })
            .collect();
        writer.write_record(&cells)?;
    }

    writer.flush()?;
    let counting = writer.into_inner().map_err(|err| err.into_error())?;
    Ok(CsvExportSummary {
        rows: rows.len() as u64,
        bytes: counting.bytes_written(),
    })
}

/// Declared column of an imported entity.
#[derive(Debug, Clone, PartialEq)]
pub struct DeclaredColumn {
    pub path: String,
    pub kind: ScalarKind,
    /// Nested objects may arrive flattened or as one JSON column.
    pub is_object: bool,
}

/// `None` kind means inferred; only undeclared files infer.
struct ImportColumn {
    name: String,
    kind: Option<ScalarKind>,
}

/// Declared leaf that arrives inside a JSON column and loses its kind.
struct NestedLeaf {
    path: FieldPath,
    kind: ScalarKind,
}

/// Streaming reader turning CSV rows back into nested records.
pub struct CsvRecordReader {
    entity: String,
    columns: Vec<ImportColumn>,
    nested: Vec<NestedLeaf>,
    reader: csv::Reader<BufReader<File>>,
    row: csv::StringRecord,
    line: u64,
}

impl CsvRecordReader {
    /// Open `path` and check its header against the declared columns.
    ///
    /// An undeclared column or a missing id column fails; a declared column
    /// absent from the file only warns.
    pub fn open(
        entity: &str,
        path: &Path,
        delimiter: u8,
        id_field: &FieldPath,
        declared: Option<&[DeclaredColumn]>,
    ) -> Result<Self, GenerationError> {
        let file = File::open(path).map_err(|err| {
            GenerationError::load(entity, format!("cannot open '{}': {err}", path.display()))
        })?;
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .delimiter(delimiter)
            .from_reader(BufReader::new(file));
        let headers = reader
            .headers()
            .map_err(|err| GenerationError::load(entity, format!("unreadable header: {err}")))?
            .clone();
        if headers.is_empty() {
            return Err(GenerationError::load(entity, "csv file has no header row"));
        }

        let mut columns = Vec::with_capacity(headers.len());
        for name in headers.iter() {
            FieldPath::parse(name).map_err(|err| {
                GenerationError::load(entity, format!("invalid column '{name}': {err}"))
            })?;
            let kind = match declared {
                Some(declared) => {
                    let column = declared
                        .iter()
                        .find(|column| column.path == name)
                        .ok_or_else(|| {
                            GenerationError::load(
                                entity,
                                format!("column '{name}' is not declared in the schema"),
                            )
                        })?;
                    Some(column.kind)
                }
                None => None,
            };
            columns.push(ImportColumn {
                name: name.to_string(),
                kind,
            });
        }

        let id_column = id_field.to_string();
        if !columns
            .iter()
            .any(|column| covers(&column.name, &id_column))
        {
            return Err(GenerationError::load(
                entity,
                format!("id column '{id_column}' is missing"),
            ));
        }

        let mut nested = Vec::new();
        if let Some(declared) = declared {
            for column in declared.iter().filter(|column| !column.is_object) {
                let present = columns.iter().any(|imported| covers(&imported.name, &column.path));
                if !present {
                    warn!(entity = %entity, column = %column.path, "declared column missing from csv");
                    continue;
                }
                let direct = columns.iter().any(|imported| imported.name == column.path);
                if !direct && column.kind != ScalarKind::Json {
                    let path = FieldPath::parse(&column.path).map_err(|err| {
                        GenerationError::load(entity, format!("invalid column '{}': {err}", column.path))
                    })?;
                    nested.push(NestedLeaf {
                        path,
                        kind: column.kind,
                    });
                }
            }
        }

        Ok(Self {
            entity: entity.to_string(),
            columns,
            nested,
            reader,
            row: csv::StringRecord::new(),
            line: 1,
        })
    }

    fn decode(&self) -> Result<Record, GenerationError> {
        if self.row.len() != self.columns.len() {
            return Err(GenerationError::load(
                &self.entity,
                format!(
                    "line {}: expected {} cells, found {}",
                    self.line,
                    self.columns.len(),
                    self.row.len()
                ),
            ));
        }
        let at_line =
            |err: relgen_core::Error| GenerationError::load(&self.entity, format!("line {}: {err}", self.line));
        let mut cells = Vec::with_capacity(self.columns.len());
        for (column, text) in self.columns.iter().zip(self.row.iter()) {
            let value = match column.kind {
                Some(kind) => Value::from_text(text, kind, &column.name).map_err(at_line)?,
                None => Value::infer_text(text),
            };
            cells.push((column.name.as_str(), value));
        }
        let mut record = Record::unflatten(cells).map_err(at_line)?;
        for leaf in &self.nested {
            let Some(value) = record.get_path(&leaf.path).cloned() else {
                continue;
            };
            let conformed = value
                .conform(leaf.kind, &leaf.path.to_string())
                .map_err(at_line)?;
            record.set_path(&leaf.path, conformed).map_err(at_line)?;
        }
        Ok(record)
    }
}

impl Iterator for CsvRecordReader {
    type Item = Result<Record, GenerationError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.reader.read_record(&mut self.row) {
            Ok(true) => {
                self.line += 1;
                Some(self.decode())
            }
            Ok(false) => None,
            Err(err) => Some(Err(GenerationError::load(
                &self.entity,
                format!("line {}: {err}", self.line + 1),
            ))),
        }
    }
}

/// Whether a column named `column` carries the value at `path`.
fn covers(column: &str, path: &str) -> bool {
    column == path
        || path
            .strip_prefix(column)
            .is_some_and(|rest| rest.starts_with('.'))
}

struct CountingWriter<W: Write> {
    inner: W,
    bytes: u64,
}

impl<W: Write> CountingWriter<W> {
    fn new(inner: W) -> Self {
        Self { inner, bytes: 0 }
    }

    fn bytes_written(&self) -> u64 {
        self.bytes
    }
}

impl<W: Write> Write for CountingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let size = self.inner.write(buf)?;
        self.bytes = self.bytes.saturating_add(size as u64);
        Ok(size)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    fn temp_file(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("relgen_csv_{}", uuid::Uuid::new_v4()))
            .join(name)
    }

    fn export(flatten_objects: bool) -> CsvExportSpec {
        CsvExportSpec {
            path: PathBuf::new(),
            delimiter: b';',
            include_headers: true,
            flatten_objects,
        }
    }

    fn appointment(id: &str, plate: &str) -> Record {
        let mut vehicle = Record::new();
        vehicle.insert("cLicenseNrCleaned", Value::from(plate));
        let mut full = Record::new();
        full.insert("Vehicle", Value::Object(vehicle));
        let mut record = Record::new();
        record.insert("id", Value::from(id));
        record.insert("full", Value::Object(full));
        record.insert("slot", Value::Int(3));
        record
    }

    #[test]
    fn flattened_export_reimports_nested_records() {
        let path = temp_file("appointments.csv");
        let records = vec![appointment("A1", "M123AB"), appointment("A2", "B007CD")];
        let summary = write_records_csv(&path, &records, &export(true)).expect("export");
        assert_eq!(summary.rows, 2);
        assert!(summary.bytes > 0);

        let header = std::fs::read_to_string(&path).expect("read");
        assert!(header.starts_with("id;full.Vehicle.cLicenseNrCleaned;slot"));

        let reader = CsvRecordReader::open("appointments", &path, b';', &FieldPath::field("id"), None)
            .expect("open");
        let imported: Vec<Record> = reader.collect::<Result<_, _>>().expect("rows");
        assert_eq!(imported, records);
    }

    #[test]
    fn unflattened_objects_travel_as_json() {
        let path = temp_file("appointments.csv");
        let records = vec![appointment("A1", "M123AB")];
        write_records_csv(&path, &records, &export(false)).expect("export");
        let declared = vec![
            DeclaredColumn {
                path: "id".to_string(),
                kind: ScalarKind::String,
                is_object: false,
            },
            DeclaredColumn {
                path: "full".to_string(),
                kind: ScalarKind::Json,
                is_object: true,
            },
            DeclaredColumn {
                path: "full.Vehicle.cLicenseNrCleaned".to_string(),
                kind: ScalarKind::String,
                is_object: false,
            },
            DeclaredColumn {
                path: "slot".to_string(),
                kind: ScalarKind::Int,
                is_object: false,
            },
        ];
        let reader = CsvRecordReader::open(
            "appointments",
            &path,
            b';',
            &FieldPath::field("id"),
            Some(&declared),
        )
        .expect("open");
        let imported: Vec<Record> = reader.collect::<Result<_, _>>().expect("rows");
        assert_eq!(imported, records);
    }

    #[test]
    fn header_mismatches_fail_the_load() {
        let path = temp_file("customers.csv");
        std::fs::create_dir_all(path.parent().expect("parent")).expect("dir");
        std::fs::write(&path, "name,age\nAna,31\n").expect("write");
        let err = CsvRecordReader::open("customers", &path, b',', &FieldPath::field("id"), None)
            .err()
            .expect("missing id must fail");
        assert!(matches!(err, GenerationError::Load { .. }));

        let declared = vec![DeclaredColumn {
            path: "id".to_string(),
            kind: ScalarKind::String,
            is_object: false,
        }];
        std::fs::write(&path, "id,colour\n1,red\n").expect("write");
        assert!(
            CsvRecordReader::open(
                "customers",
                &path,
                b',',
                &FieldPath::field("id"),
                Some(&declared)
            )
            .is_err()
        );
    }

    #[test]
    fn uncoercible_cells_fail_with_line_number() {
        let path = temp_file("customers.csv");
        std::fs::create_dir_all(path.parent().expect("parent")).expect("dir");
        std::fs::write(&path, "id,age\n1,31\n2,old\n").expect("write");
        let declared = vec![
            DeclaredColumn {
                path: "id".to_string(),
                kind: ScalarKind::Int,
                is_object: false,
            },
            DeclaredColumn {
                path: "age".to_string(),
                kind: ScalarKind::Int,
                is_object: false,
            },
        ];
        let reader = CsvRecordReader::open(
            "customers",
            &path,
            b',',
            &FieldPath::field("id"),
            Some(&declared),
        )
        .expect("open");
        let results: Vec<_> = reader.collect();
        assert!(results[0].is_ok());
        match &results[1] {
            Err(GenerationError::Load { message, .. }) => assert!(message.contains("line 3")),
            other => panic!("expected load error, got {other:?}"),
        }
    }
}
