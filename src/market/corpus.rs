use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum CorpusError {
    #[error("Failed to open market corpus {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed market corpus row (line {line:?}): {source}")]
    Row {
        line: Option<u64>,
        #[source]
        source: csv::Error,
    },

    #[error("Corpus loading task failed: {0}")]
    Task(String),
}

/// One historical track of the reference corpus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "CorpusRow")]
pub struct MarketTrack {
    pub genre: String,
    pub popularity: f64,
    pub danceability: f64,
    pub energy: f64,
    pub key: f64,
    pub mode: f64,
    pub valence: f64,
    pub tempo: f64,
    pub duration_ms: f64,
}

/// Raw CSV row. Public Spotify track datasets name the genre and duration
/// columns differently and some carry several of them, so every variant is
/// read into its own field and resolved afterwards.
#[derive(Debug, Deserialize)]
struct CorpusRow {
    genre_clean: Option<String>,
    genre: Option<String>,
    track_genre: Option<String>,
    popularity: f64,
    danceability: f64,
    energy: f64,
    key: f64,
    mode: f64,
    valence: f64,
    tempo: f64,
    duration_ms: Option<f64>,
    duration: Option<f64>,
}

impl TryFrom<CorpusRow> for MarketTrack {
    type Error = String;

    /// The cleaned label wins because the model's `genre_clean_` indicators
    /// were built from it.
    fn try_from(row: CorpusRow) -> Result<Self, String> {
        let genre = [row.genre_clean, row.genre, row.track_genre]
            .into_iter()
            .flatten()
            .find(|g| !g.trim().is_empty())
            .ok_or("no genre_clean, genre or track_genre value")?;
        let duration_ms = row
            .duration_ms
            .or(row.duration)
            .ok_or("no duration_ms or duration value")?;
        Ok(MarketTrack {
            genre,
            popularity: row.popularity,
            danceability: row.danceability,
            energy: row.energy,
            key: row.key,
            mode: row.mode,
            valence: row.valence,
            tempo: row.tempo,
            duration_ms,
        })
    }
}

impl MarketTrack {
    pub fn has_genre(&self, genre: &str) -> bool {
        self.genre.trim().eq_ignore_ascii_case(genre.trim())
    }
}

/// Read-only reference dataset.
#[derive(Debug, Clone, Default)]
pub struct MarketCorpus {
    tracks: Vec<MarketTrack>,
}

impl MarketCorpus {
    pub fn new(tracks: Vec<MarketTrack>) -> Self {
        Self { tracks }
    }

    pub fn tracks(&self) -> &[MarketTrack] {
        &self.tracks
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    /// Loads a CSV file with a header row. Unknown columns are ignored.
    pub fn load_csv(path: &Path) -> Result<Self, CorpusError> {
        let file = File::open(path).map_err(|source| CorpusError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let corpus = Self::from_csv_reader(file)?;
        info!(path = ?path, tracks = corpus.len(), "Loaded market corpus");
        Ok(corpus)
    }

    pub fn from_csv_reader<R: Read>(reader: R) -> Result<Self, CorpusError> {
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(reader);

        let mut tracks = Vec::new();
        for row in reader.deserialize::<MarketTrack>() {
            let track = row.map_err(|source| CorpusError::Row {
                line: source.position().map(|p| p.line()),
                source,
            })?;
            tracks.push(track);
        }
        debug!(tracks = tracks.len(), "Parsed market corpus rows");
        Ok(Self { tracks })
    }
}

/// Where the aggregator gets its corpus from.
///
/// Either loaded once at startup and shared, or re-read from disk on every
/// request (on the blocking pool).
#[derive(Debug, Clone)]
pub enum CorpusSource {
    Cached(Arc<MarketCorpus>),
    OnDemand(PathBuf),
}

impl CorpusSource {
    pub async fn get(&self) -> Result<Arc<MarketCorpus>, CorpusError> {
        match self {
            CorpusSource::Cached(corpus) => Ok(Arc::clone(corpus)),
            CorpusSource::OnDemand(path) => {
                let path = path.clone();
                tokio::task::spawn_blocking(move || MarketCorpus::load_csv(&path))
                    .await
                    .map_err(|e| CorpusError::Task(e.to_string()))?
                    .map(Arc::new)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const CSV: &str = "\
track_id,track_genre,popularity,explicit,danceability,energy,key,mode,valence,tempo,duration_ms
a1,pop,73,False,0.676,0.461,1,0,0.715,87.917,230666
a2,acoustic,55,False,0.42,0.166,1,1,0.267,77.489,149610
";

    #[test]
    fn test_parse_spotify_style_csv() {
        let corpus = MarketCorpus::from_csv_reader(CSV.as_bytes()).unwrap();
        assert_eq!(corpus.len(), 2);

        let first = &corpus.tracks()[0];
        assert_eq!(first.genre, "pop");
        assert_eq!(first.popularity, 73.0);
        assert_eq!(first.key, 1.0);
        assert_eq!(first.mode, 0.0);
        assert_eq!(first.duration_ms, 230666.0);
    }

    #[test]
    fn test_malformed_row_reports_line() {
        let bad = "genre,popularity,danceability,energy,key,mode,valence,tempo,duration_ms\n\
                   pop,80,0.5,0.5,1,1,0.5,120,200000\n\
                   rock,high,0.5,0.5,1,1,0.5,120,200000\n";
        let err = MarketCorpus::from_csv_reader(bad.as_bytes()).unwrap_err();
        match err {
            CorpusError::Row { line, .. } => assert_eq!(line, Some(3)),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_missing_column_is_error() {
        let bad = "genre,popularity\npop,80\n";
        assert!(matches!(
            MarketCorpus::from_csv_reader(bad.as_bytes()),
            Err(CorpusError::Row { .. })
        ));
    }

    #[test]
    fn test_raw_and_cleaned_genre_columns() {
        let csv = "\
track_genre,genre_clean,popularity,danceability,energy,key,mode,valence,tempo,duration_ms
Dance Pop,pop,80,0.7,0.6,5,1,0.5,118,201000
indie,,41,0.5,0.4,2,0,0.3,96,250000
";
        let corpus = MarketCorpus::from_csv_reader(csv.as_bytes()).unwrap();
        assert_eq!(corpus.len(), 2);
        assert_eq!(corpus.tracks()[0].genre, "pop");
        assert_eq!(corpus.tracks()[0].popularity, 80.0);
        assert_eq!(corpus.tracks()[1].genre, "indie");
    }

    #[test]
    fn test_duration_column_alias() {
        let csv = "genre,popularity,danceability,energy,key,mode,valence,tempo,duration\n\
                   rock,60,0.5,0.8,4,1,0.6,140,190000\n";
        let corpus = MarketCorpus::from_csv_reader(csv.as_bytes()).unwrap();
        assert_eq!(corpus.tracks()[0].duration_ms, 190000.0);
    }

    #[test]
    fn test_row_without_genre_reports_line() {
        let csv = "genre,popularity,danceability,energy,key,mode,valence,tempo,duration_ms\n\
                   pop,80,0.5,0.5,1,1,0.5,120,200000\n\
                   ,70,0.5,0.5,1,1,0.5,120,200000\n";
        match MarketCorpus::from_csv_reader(csv.as_bytes()).unwrap_err() {
            CorpusError::Row { line, source } => {
                assert_eq!(line, Some(3));
                assert!(source.to_string().contains("no genre_clean"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_missing_file_is_io_error() {
        assert!(matches!(
            MarketCorpus::load_csv(Path::new("/nonexistent/corpus.csv")),
            Err(CorpusError::Io { .. })
        ));
    }

    #[test]
    fn test_genre_matching_is_case_insensitive() {
        let corpus = MarketCorpus::from_csv_reader(CSV.as_bytes()).unwrap();
        assert!(corpus.tracks()[0].has_genre("POP "));
        assert!(!corpus.tracks()[0].has_genre("k-pop"));
    }

    #[tokio::test]
    async fn test_on_demand_source_reads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(CSV.as_bytes()).unwrap();

        let source = CorpusSource::OnDemand(file.path().to_path_buf());
        let corpus = source.get().await.unwrap();
        assert_eq!(corpus.len(), 2);

        let cached = CorpusSource::Cached(corpus.clone());
        assert!(Arc::ptr_eq(&cached.get().await.unwrap(), &corpus));
    }
}
