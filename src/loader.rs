use crate::error::{DashboardError, Result};
use crate::types::{columns, Period, RawRow, Record};
use crate::util::{normalize_cnes, parse_f64_safe};
use crate::view::Dataset;
use csv::{ReaderBuilder, Trim};
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, info};

#[derive(Debug, Clone, Default)]
pub struct LoadReport {
    pub total_rows: usize,
    pub hospitals: usize,
    pub first_period: Option<Period>,
    pub last_period: Option<Period>,
    /// Unknown cells per numeric column, in `columns::REQUIRED` order.
    pub unknown_values: Vec<(&'static str, usize)>,
}

impl LoadReport {
    pub fn total_unknown(&self) -> usize {
        self.unknown_values.iter().map(|(_, n)| n).sum()
    }
}

/// Read the source CSV into records sorted by period, then hospital id.
///
/// Key columns (`CNES`, `COMPETEN`) must parse; numeric columns degrade to
/// unknown. A repeated `(CNES, COMPETEN)` pair is rejected.
pub fn load_records(path: &Path) -> Result<(Vec<Record>, LoadReport)> {
    if !path.exists() {
        return Err(DashboardError::NotFound(path.to_path_buf()));
    }
    let mut rdr = ReaderBuilder::new()
        .flexible(true)
        .trim(Trim::Headers)
        .from_path(path)?;

    let headers = rdr.headers()?.clone();
    for required in columns::REQUIRED {
        if !headers.iter().any(|h| h == required) {
            return Err(DashboardError::missing_column(required));
        }
    }

    let mut unknown: HashMap<&'static str, usize> = HashMap::new();
    let mut seen: HashMap<(String, Period), u64> = HashMap::new();
    let mut records: Vec<Record> = Vec::new();

    for result in rdr.records() {
        let raw = result?;
        let line = raw.position().map(|p| p.line()).unwrap_or_default();
        let row: RawRow = raw.deserialize(Some(&headers))?;

        let hospital_id = normalize_cnes(row.cnes.as_deref()).map_err(|reason| {
            DashboardError::MalformedData {
                column: columns::CNES.to_string(),
                line: Some(line),
                reason,
            }
        })?;
        let raw_period = row.competen.as_deref().unwrap_or("");
        let period = Period::parse_competen(raw_period).ok_or_else(|| {
            DashboardError::MalformedData {
                column: columns::COMPETEN.to_string(),
                line: Some(line),
                reason: format!("cannot parse '{}' as YYYYMM", raw_period.trim()),
            }
        })?;

        if let Some(first_line) = seen.insert((hospital_id.clone(), period), line) {
            return Err(DashboardError::DuplicateRecord {
                hospital_id,
                period,
                first_line,
                second_line: line,
            });
        }

        let mut numeric = |column: &'static str, cell: Option<&str>| {
            let value = parse_f64_safe(cell);
            if value.is_none() {
                *unknown.entry(column).or_default() += 1;
            }
            value
        };

        records.push(Record {
            rooms_count: numeric(columns::ROOMS, row.rooms.as_deref()),
            sus_beds_count: numeric(columns::SUS_BEDS, row.sus_beds.as_deref()),
            physician_hours: numeric(columns::PHYSICIAN_HOURS, row.physician_hours.as_deref()),
            nursing_hours: numeric(columns::NURSING_HOURS, row.nursing_hours.as_deref()),
            production_value: numeric(columns::PRODUCTION, row.production.as_deref()),
            efficiency_score: numeric(columns::EFFICIENCY, row.efficiency.as_deref()),
            hospital_id,
            period,
        });
    }

    records.sort_by(|a, b| {
        a.period
            .cmp(&b.period)
            .then_with(|| a.hospital_id.cmp(&b.hospital_id))
    });

    let hospitals: BTreeSet<&str> = records.iter().map(|r| r.hospital_id.as_str()).collect();
    let unknown_values = columns::REQUIRED
        .iter()
        .skip(2)
        .map(|c| (*c, unknown.get(c).copied().unwrap_or(0)))
        .collect();
    let report = LoadReport {
        total_rows: records.len(),
        hospitals: hospitals.len(),
        first_period: records.first().map(|r| r.period),
        last_period: records.last().map(|r| r.period),
        unknown_values,
    };
    info!(
        path = %path.display(),
        rows = report.total_rows,
        hospitals = report.hospitals,
        unknown = report.total_unknown(),
        "loaded efficiency records"
    );
    Ok((records, report))
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct CacheKey {
    path: PathBuf,
    modified: SystemTime,
}

/// Holds the last loaded dataset and reloads only when the file's path or
/// modification time changes.
#[derive(Default)]
pub struct DatasetCache {
    entry: Option<(CacheKey, Dataset, LoadReport)>,
}

impl DatasetCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_load(&mut self, path: &Path) -> Result<(Dataset, LoadReport)> {
        let metadata = std::fs::metadata(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => DashboardError::NotFound(path.to_path_buf()),
            _ => DashboardError::Io(e),
        })?;
        let key = CacheKey {
            path: std::fs::canonicalize(path)?,
            modified: metadata.modified()?,
        };

        if let Some((cached_key, dataset, report)) = &self.entry {
            if *cached_key == key {
                debug!(path = %path.display(), "dataset cache hit");
                return Ok((dataset.clone(), report.clone()));
            }
        }

        let (records, report) = load_records(path)?;
        let dataset = Dataset::new(records);
        self.entry = Some((key, dataset.clone(), report.clone()));
        Ok((dataset, report))
    }

    pub fn is_loaded(&self) -> bool {
        self.entry.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const HEADER: &str =
        "CNES,COMPETEN,CNES_SALAS,CNES_LEITOS_SUS,HORAS_MEDICOS,HORAS_ENFERMAGEM,SIA_SIH_VALOR,Eficiência";

    fn csv_file(body: &str) -> NamedTempFile {
        let mut f = NamedTempFile::new().unwrap();
        writeln!(f, "{}", HEADER).unwrap();
        write!(f, "{}", body).unwrap();
        f.flush().unwrap();
        f
    }

    #[test]
    fn loads_and_sorts_by_period() {
        let f = csv_file(
            "123,202002,3,10,100,200,1500.5,0.6\n\
             123,202001,3,10,100,200,1000,0.5\n",
        );
        let (records, report) = load_records(f.path()).unwrap();
        assert_eq!(report.total_rows, 2);
        assert_eq!(report.hospitals, 1);
        assert_eq!(records[0].period, Period::from_ym(2020, 1).unwrap());
        assert_eq!(records[0].hospital_id, "0000123");
        assert_eq!(records[1].production_value, Some(1500.5));
        assert_eq!(report.first_period, Period::from_ym(2020, 1));
    }

    #[test]
    fn unparseable_numbers_become_unknown() {
        let f = csv_file("123,202001,,x,100,200,1000,abc\n");
        let (records, report) = load_records(f.path()).unwrap();
        let r = &records[0];
        assert_eq!(r.rooms_count, None);
        assert_eq!(r.sus_beds_count, None);
        assert_eq!(r.efficiency_score, None);
        assert_eq!(r.physician_hours, Some(100.0));
        assert_eq!(report.total_unknown(), 3);
    }

    #[test]
    fn exponent_notation_is_a_known_value() {
        let f = csv_file("123,202001,2,10,400,900,1.5e+06,5.2e-05\n");
        let (records, report) = load_records(f.path()).unwrap();
        assert_eq!(records[0].production_value, Some(1.5e6));
        assert_eq!(records[0].efficiency_score, Some(5.2e-05));
        assert_eq!(report.total_unknown(), 0);
    }

    #[test]
    fn missing_file_is_not_found() {
        let err = load_records(Path::new("/definitely/not/here.csv")).unwrap_err();
        assert!(matches!(err, DashboardError::NotFound(_)));
    }

    #[test]
    fn missing_column_is_reported_by_name() {
        let mut f = NamedTempFile::new().unwrap();
        writeln!(f, "CNES,COMPETEN,CNES_SALAS").unwrap();
        writeln!(f, "1,201901,2").unwrap();
        let err = load_records(f.path()).unwrap_err();
        match err {
            DashboardError::MalformedData { column, line, .. } => {
                assert_eq!(column, "CNES_LEITOS_SUS");
                assert_eq!(line, None);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn bad_period_is_a_hard_error() {
        let f = csv_file("123,202001,1,1,1,1,1,0.5\n123,2020-02,1,1,1,1,1,0.5\n");
        match load_records(f.path()).unwrap_err() {
            DashboardError::MalformedData { column, line, .. } => {
                assert_eq!(column, "COMPETEN");
                assert_eq!(line, Some(3));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn bad_cnes_is_a_hard_error() {
        let f = csv_file(",202001,1,1,1,1,1,0.5\n");
        let err = load_records(f.path()).unwrap_err();
        assert!(matches!(err, DashboardError::MalformedData { ref column, .. } if column == "CNES"));
    }

    #[test]
    fn duplicate_key_is_rejected() {
        // "123" and "0000123" normalize to the same hospital.
        let f = csv_file("123,202001,1,1,1,1,1,0.5\n0000123,202001,1,1,1,1,1,0.7\n");
        match load_records(f.path()).unwrap_err() {
            DashboardError::DuplicateRecord {
                hospital_id,
                first_line,
                second_line,
                ..
            } => {
                assert_eq!(hospital_id, "0000123");
                assert_eq!((first_line, second_line), (2, 3));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn extra_columns_are_ignored() {
        let mut f = NamedTempFile::new().unwrap();
        writeln!(f, "{},Erro,UF", HEADER).unwrap();
        writeln!(f, "9,201905,1,2,3,4,5,0.9,,SP").unwrap();
        let (records, _) = load_records(f.path()).unwrap();
        assert_eq!(records[0].efficiency_score, Some(0.9));
    }

    #[test]
    fn cache_reuses_dataset_until_file_changes() {
        let f = csv_file("123,202001,1,1,1,1,1,0.5\n");
        let mut cache = DatasetCache::new();
        assert!(!cache.is_loaded());
        let (first, _) = cache.get_or_load(f.path()).unwrap();
        let (second, _) = cache.get_or_load(f.path()).unwrap();
        assert!(first.ptr_eq(&second));

        let mut file = std::fs::OpenOptions::new().append(true).open(f.path()).unwrap();
        writeln!(file, "123,202002,1,1,1,1,1,0.6").unwrap();
        drop(file);
        let later = SystemTime::now() + std::time::Duration::from_secs(5);
        std::fs::File::options()
            .write(true)
            .open(f.path())
            .unwrap()
            .set_modified(later)
            .unwrap();

        let (third, report) = cache.get_or_load(f.path()).unwrap();
        assert!(!first.ptr_eq(&third));
        assert_eq!(report.total_rows, 2);
    }

    #[test]
    fn cache_reports_missing_file() {
        let mut cache = DatasetCache::new();
        let err = cache.get_or_load(Path::new("/nope/resultado.csv")).unwrap_err();
        assert!(matches!(err, DashboardError::NotFound(_)));
    }
}
