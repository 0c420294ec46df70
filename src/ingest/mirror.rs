/// PostgreSQL mirror of GHCN-Daily.
///
/// For development and offline use when BigQuery is unavailable or too slow.
/// The mirror holds two tables under a configurable schema:
///
///   {schema}.stations (id TEXT PRIMARY KEY, name TEXT,
///                      latitude DOUBLE PRECISION, longitude DOUBLE PRECISION)
///   {schema}.daily    (station_id TEXT, obs_date DATE, element TEXT, value INTEGER)
///
/// Values use the same encoding as the public dataset (tenths of °C and
/// tenths of mm).

use postgres::types::{FromSql, ToSql};
use postgres::{Client, NoTls, Row};
use std::sync::Mutex;

use super::{ExceedanceQuery, NearestStationQuery, ObservationQuery, ObservationSource};
use crate::config::MirrorConfig;
use crate::logging::{self, DataSource};
use crate::model::{
    Element, ExceedanceCounts, Observation, StationObservation, WeatherError, WeatherResult,
};

pub struct MirrorSource {
    connection: Mutex<Reconnecting<Client>>,
    schema: String,
}

/// A database session that can tell when it has been dropped by the server.
pub trait Session: Send {
    fn is_closed(&self) -> bool;
}

impl Session for Client {
    fn is_closed(&self) -> bool {
        Client::is_closed(self)
    }
}

type Connector<S> = Box<dyn Fn() -> WeatherResult<S> + Send + Sync>;

/// Holds one session and replaces it when the server has closed it.
///
/// A retry after a lost connection then runs on a fresh session instead of
/// failing again on the dead one.
pub struct Reconnecting<S> {
    session: Option<S>,
    connect: Connector<S>,
}

impl<S: Session> Reconnecting<S> {
    /// Connects once up front so configuration errors surface at startup.
    pub fn new(connect: Connector<S>) -> WeatherResult<Self> {
        let session = connect()?;
        Ok(Self { session: Some(session), connect })
    }

    pub fn run<T>(&mut self, op: impl FnOnce(&mut S) -> WeatherResult<T>) -> WeatherResult<T> {
        if self.session.as_ref().is_some_and(S::is_closed) {
            logging::warn(DataSource::Mirror, None, "connection closed by server; reconnecting");
            self.session = None;
        }
        if self.session.is_none() {
            self.session = Some((self.connect)()?);
        }
        let Some(session) = self.session.as_mut() else {
            return Err(WeatherError::DataSourceUnavailable {
                data_source: DataSource::Mirror,
                context: "connect".to_string(),
                detail: "no session available".to_string(),
                transient: true,
            });
        };

        let result = op(session);
        if result.is_err() && session.is_closed() {
            self.session = None;
        }
        result
    }
}

/// Typed, fallible column access. `Row` implements it; tests use a stand-in.
pub trait Columns {
    fn column<'a, T: FromSql<'a>>(&'a self, index: usize) -> Result<T, String>;
}

impl Columns for Row {
    fn column<'a, T: FromSql<'a>>(&'a self, index: usize) -> Result<T, String> {
        self.try_get(index).map_err(|e| e.to_string())
    }
}

fn column<'a, R: Columns, T: FromSql<'a>>(row: &'a R, index: usize, name: &str) -> WeatherResult<T> {
    row.column(index)
        .map_err(|e| WeatherError::MalformedResponse(format!("column '{}': {}", name, e)))
}

pub fn decode_observation<R: Columns>(row: &R) -> WeatherResult<Observation> {
    Ok(Observation {
        station_id: column(row, 0, "station_id")?,
        date: column(row, 1, "obs_date")?,
        element: parse_element(column(row, 2, "element")?)?,
        raw_value: column(row, 3, "value")?,
    })
}

/// A NULL station name decodes as empty; every other NULL is malformed.
pub fn decode_station_observation<R: Columns>(row: &R) -> WeatherResult<StationObservation> {
    let name: Option<String> = column(row, 1, "name")?;
    Ok(StationObservation {
        station_id: column(row, 0, "id")?,
        station_name: name.unwrap_or_default().trim().to_string(),
        date: column(row, 2, "obs_date")?,
        element: parse_element(column(row, 3, "element")?)?,
        value: column(row, 4, "value")?,
        distance_miles: column(row, 5, "distance_miles")?,
    })
}

pub fn decode_counts<R: Columns>(row: &R) -> WeatherResult<ExceedanceCounts> {
    Ok(ExceedanceCounts {
        exceedance_count: non_negative(column(row, 0, "exceedance_count")?, "exceedance_count")?,
        total_observations: non_negative(column(row, 1, "total_observations")?, "total_observations")?,
    })
}

/// Schema names are formatted into SQL, so only plain identifiers pass.
pub fn validate_schema(schema: &str) -> WeatherResult<()> {
    let mut chars = schema.chars();
    let valid = chars.next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(WeatherError::Config(format!(
            "mirror.schema '{}' is not a plain SQL identifier",
            schema
        )))
    }
}

pub fn observations_sql(schema: &str) -> String {
    format!(
        "SELECT station_id, obs_date, element, value
         FROM {schema}.daily
         WHERE station_id = $1
           AND element = ANY($2)
           AND obs_date >= make_date($3, 1, 1)
           AND obs_date <= make_date($4, 12, 31)
           AND ($5::date IS NULL OR obs_date >= $5::date)
           AND ($6::date IS NULL OR obs_date <= $6::date)
           AND ($7::int IS NULL OR value >= $7::int)
         ORDER BY obs_date DESC, element"
    )
}

pub fn nearest_station_sql(schema: &str) -> String {
    // Haversine in SQL so the mirror needs no PostGIS extension
    format!(
        "WITH closest AS (
           SELECT id, name,
                  2 * 6371008.8 * asin(sqrt(
                      power(sin(radians(latitude - $1::float8) / 2), 2)
                    + cos(radians($1::float8)) * cos(radians(latitude))
                    * power(sin(radians(longitude - $2::float8) / 2), 2)
                  )) / 1609.34 AS distance_miles
           FROM {schema}.stations
           ORDER BY distance_miles
           LIMIT 1
         )
         SELECT c.id, c.name, d.obs_date, d.element, d.value, c.distance_miles
         FROM closest c
         JOIN {schema}.daily d ON d.station_id = c.id
         WHERE d.element = ANY($3)
           AND d.obs_date >= make_date($4, 1, 1)
           AND d.obs_date <= make_date($4, 12, 31)
         ORDER BY d.obs_date DESC, d.element
         LIMIT $5"
    )
}

pub fn precipitation_counts_sql(schema: &str) -> String {
    format!(
        "SELECT COUNT(*) FILTER (WHERE value::float8 / 10.0 / 25.4 >= $4::float8),
                COUNT(*)
         FROM {schema}.daily
         WHERE station_id = $1
           AND element = 'PRCP'
           AND obs_date >= make_date($2, 1, 1)
           AND obs_date <= make_date($3, 12, 31)"
    )
}

fn parse_element(code: &str) -> WeatherResult<Element> {
    code.parse::<Element>()
        .map_err(|_| WeatherError::MalformedResponse(format!("unexpected element code '{}'", code)))
}

fn non_negative(value: i64, column: &str) -> WeatherResult<u64> {
    u64::try_from(value)
        .map_err(|_| WeatherError::MalformedResponse(format!("negative {} {}", column, value)))
}

impl MirrorSource {
    pub fn connect(config: &MirrorConfig) -> WeatherResult<Self> {
        validate_schema(&config.schema)?;
        let url = config
            .url
            .clone()
            .ok_or_else(|| WeatherError::Config("mirror.url (or DATABASE_URL) is not set".to_string()))?;

        let connection = Reconnecting::new(Box::new(move || {
            Client::connect(&url, NoTls).map_err(|e| WeatherError::DataSourceUnavailable {
                data_source: DataSource::Mirror,
                context: "connect".to_string(),
                detail: e.to_string(),
                transient: true,
            })
        }))?;
        logging::info(
            DataSource::Mirror,
            None,
            &format!("connected to GHCN mirror (schema {})", config.schema),
        );

        Ok(Self {
            connection: Mutex::new(connection),
            schema: config.schema.clone(),
        })
    }

    /// SQL errors are permanent; connection-level failures may clear up.
    fn db_error(context: &str, err: postgres::Error) -> WeatherError {
        let transient = err.as_db_error().is_none();
        WeatherError::DataSourceUnavailable {
            data_source: DataSource::Mirror,
            context: context.to_string(),
            detail: err.to_string(),
            transient,
        }
    }

    fn query(
        &self,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
        context: &str,
    ) -> WeatherResult<Vec<Row>> {
        let mut connection = self.connection.lock().map_err(|_| WeatherError::DataSourceUnavailable {
            data_source: DataSource::Mirror,
            context: context.to_string(),
            detail: "connection mutex poisoned".to_string(),
            transient: false,
        })?;
        connection.run(|client| client.query(sql, params).map_err(|e| Self::db_error(context, e)))
    }
}

impl ObservationSource for MirrorSource {
    fn data_source(&self) -> DataSource {
        DataSource::Mirror
    }

    fn observations(&self, query: &ObservationQuery) -> WeatherResult<Vec<Observation>> {
        let codes: Vec<String> = query.elements.iter().map(|e| e.code().to_string()).collect();
        let rows = self.query(
            &observations_sql(&self.schema),
            &[
                &query.station_id,
                &codes,
                &query.start_year,
                &query.end_year,
                &query.start_date,
                &query.end_date,
                &query.min_raw_value,
            ],
            &query.describe(),
        )?;

        rows.iter().map(|row| decode_observation(row)).collect()
    }

    fn nearest_station_observations(
        &self,
        query: &NearestStationQuery,
    ) -> WeatherResult<Vec<StationObservation>> {
        let codes: Vec<String> = query.elements.iter().map(|e| e.code().to_string()).collect();
        let limit = i64::try_from(query.limit).unwrap_or(i64::MAX);
        let rows = self.query(
            &nearest_station_sql(&self.schema),
            &[&query.latitude, &query.longitude, &codes, &query.year, &limit],
            &query.describe(),
        )?;

        rows.iter().map(|row| decode_station_observation(row)).collect()
    }

    fn precipitation_counts(&self, query: &ExceedanceQuery) -> WeatherResult<ExceedanceCounts> {
        let rows = self.query(
            &precipitation_counts_sql(&self.schema),
            &[&query.station_id, &query.start_year, &query.end_year, &query.threshold.0],
            &query.describe(),
        )?;

        match rows.first() {
            Some(row) => decode_counts(row),
            None => Ok(ExceedanceCounts::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use postgres::types::Type;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Columns in Postgres binary wire format, decoded through `FromSql`
    /// exactly as a real `Row` would be.
    struct WireRow(Vec<(Type, Option<Vec<u8>>)>);

    impl Columns for WireRow {
        fn column<'a, T: FromSql<'a>>(&'a self, index: usize) -> Result<T, String> {
            let (ty, raw) = self.0.get(index).ok_or_else(|| format!("no column {}", index))?;
            if !T::accepts(ty) {
                return Err(format!("cannot convert column {} of type {}", index, ty));
            }
            T::from_sql_nullable(ty, raw.as_deref()).map_err(|e| e.to_string())
        }
    }

    fn text(value: &str) -> (Type, Option<Vec<u8>>) {
        (Type::TEXT, Some(value.as_bytes().to_vec()))
    }

    fn int4(value: i32) -> (Type, Option<Vec<u8>>) {
        (Type::INT4, Some(value.to_be_bytes().to_vec()))
    }

    fn int8(value: i64) -> (Type, Option<Vec<u8>>) {
        (Type::INT8, Some(value.to_be_bytes().to_vec()))
    }

    fn float8(value: f64) -> (Type, Option<Vec<u8>>) {
        (Type::FLOAT8, Some(value.to_be_bytes().to_vec()))
    }

    /// DATE is days since 2000-01-01.
    fn date(y: i32, m: u32, d: u32) -> (Type, Option<Vec<u8>>) {
        let epoch = NaiveDate::from_ymd_opt(2000, 1, 1).unwrap();
        let days = (NaiveDate::from_ymd_opt(y, m, d).unwrap() - epoch).num_days() as i32;
        (Type::DATE, Some(days.to_be_bytes().to_vec()))
    }

    fn null(ty: Type) -> (Type, Option<Vec<u8>>) {
        (ty, None)
    }

    #[test]
    fn test_decode_observation_row() {
        let row = WireRow(vec![text("USW00023183"), date(2024, 7, 10), text("TMAX"), int4(456)]);
        let obs = decode_observation(&row).unwrap();
        assert_eq!(obs.station_id, "USW00023183");
        assert_eq!(obs.date, NaiveDate::from_ymd_opt(2024, 7, 10).unwrap());
        assert_eq!(obs.element, Element::Tmax);
        assert_eq!(obs.raw_value, 456);
    }

    #[test]
    fn test_null_or_mistyped_value_is_malformed_not_a_panic() {
        let null_value = WireRow(vec![text("USW00023183"), date(2024, 7, 10), text("TMAX"), null(Type::INT4)]);
        assert!(matches!(decode_observation(&null_value), Err(WeatherError::MalformedResponse(_))));

        let float_value = WireRow(vec![text("USW00023183"), date(2024, 7, 10), text("TMAX"), float8(45.6)]);
        assert!(matches!(decode_observation(&float_value), Err(WeatherError::MalformedResponse(_))));

        let short_row = WireRow(vec![text("USW00023183")]);
        assert!(matches!(decode_observation(&short_row), Err(WeatherError::MalformedResponse(_))));
    }

    #[test]
    fn test_null_station_name_decodes_as_empty() {
        let row = WireRow(vec![
            text("USW00094728"),
            null(Type::TEXT),
            date(2021, 9, 1),
            text("PRCP"),
            int4(1811),
            float8(2.4),
        ]);
        let obs = decode_station_observation(&row).unwrap();
        assert_eq!(obs.station_name, "");
        assert_eq!(obs.value, 1811);

        let mut null_distance = row.0.clone();
        null_distance[5] = null(Type::FLOAT8);
        assert!(decode_station_observation(&WireRow(null_distance)).is_err());
    }

    #[test]
    fn test_decode_counts_row() {
        let counts = decode_counts(&WireRow(vec![int8(4), int8(3650)])).unwrap();
        assert_eq!(counts, ExceedanceCounts { exceedance_count: 4, total_observations: 3650 });
        assert!(decode_counts(&WireRow(vec![int8(-1), int8(3650)])).is_err());
    }

    struct FakeSession {
        closed: Arc<AtomicBool>,
    }

    impl Session for FakeSession {
        fn is_closed(&self) -> bool {
            self.closed.load(Ordering::SeqCst)
        }
    }

    /// A connector that counts connections and hands out sessions sharing
    /// one `closed` flag, which it resets on every connect.
    fn counting_connector(
        connects: Arc<AtomicUsize>,
        closed: Arc<AtomicBool>,
        fail: Arc<AtomicBool>,
    ) -> Connector<FakeSession> {
        Box::new(move || {
            if fail.load(Ordering::SeqCst) {
                return Err(WeatherError::DataSourceUnavailable {
                    data_source: DataSource::Mirror,
                    context: "connect".to_string(),
                    detail: "connection refused".to_string(),
                    transient: true,
                });
            }
            connects.fetch_add(1, Ordering::SeqCst);
            closed.store(false, Ordering::SeqCst);
            Ok(FakeSession { closed: Arc::clone(&closed) })
        })
    }

    fn lost_connection() -> WeatherError {
        WeatherError::DataSourceUnavailable {
            data_source: DataSource::Mirror,
            context: "query".to_string(),
            detail: "connection closed".to_string(),
            transient: true,
        }
    }

    #[test]
    fn test_reconnects_after_server_closes_session() {
        let connects = Arc::new(AtomicUsize::new(0));
        let closed = Arc::new(AtomicBool::new(false));
        let fail = Arc::new(AtomicBool::new(false));
        let mut conn =
            Reconnecting::new(counting_connector(connects.clone(), closed.clone(), fail)).unwrap();
        assert_eq!(connects.load(Ordering::SeqCst), 1);

        // The query drops the connection and fails transiently.
        let first: WeatherResult<()> = conn.run(|session| {
            session.closed.store(true, Ordering::SeqCst);
            Err(lost_connection())
        });
        assert!(first.unwrap_err().is_transient());

        // The retry gets a fresh session.
        let second = conn.run(|session| Ok(session.is_closed()));
        assert!(!second.unwrap());
        assert_eq!(connects.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_open_session_is_reused() {
        let connects = Arc::new(AtomicUsize::new(0));
        let mut conn = Reconnecting::new(counting_connector(
            connects.clone(),
            Arc::new(AtomicBool::new(false)),
            Arc::new(AtomicBool::new(false)),
        ))
        .unwrap();

        let sql_error: WeatherResult<()> = conn.run(|_| {
            Err(WeatherError::DataSourceUnavailable {
                data_source: DataSource::Mirror,
                context: "query".to_string(),
                detail: "relation does not exist".to_string(),
                transient: false,
            })
        });
        assert!(sql_error.is_err());
        for _ in 0..3 {
            conn.run(|_| Ok(())).unwrap();
        }
        assert_eq!(connects.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failed_reconnect_is_retried_on_next_call() {
        let connects = Arc::new(AtomicUsize::new(0));
        let closed = Arc::new(AtomicBool::new(false));
        let fail = Arc::new(AtomicBool::new(false));
        let mut conn =
            Reconnecting::new(counting_connector(connects.clone(), closed.clone(), fail.clone())).unwrap();

        closed.store(true, Ordering::SeqCst);
        fail.store(true, Ordering::SeqCst);
        let err = conn.run(|_| Ok(())).unwrap_err();
        assert!(err.is_transient());

        fail.store(false, Ordering::SeqCst);
        conn.run(|_| Ok(())).unwrap();
        assert_eq!(connects.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_schema_validation() {
        assert!(validate_schema("ghcn").is_ok());
        assert!(validate_schema("_ghcn_2024").is_ok());
        assert!(validate_schema("").is_err());
        assert!(validate_schema("1ghcn").is_err());
        assert!(validate_schema("ghcn; DROP TABLE x").is_err());
        assert!(validate_schema("public.ghcn").is_err());
    }

    #[test]
    fn test_sql_uses_schema_and_placeholders() {
        let sql = observations_sql("ghcn");
        assert!(sql.contains("FROM ghcn.daily"));
        assert!(sql.contains("element = ANY($2)"));
        assert!(sql.contains("ORDER BY obs_date DESC, element"));

        let sql = nearest_station_sql("mirror");
        assert!(sql.contains("FROM mirror.stations"));
        assert!(sql.contains("JOIN mirror.daily"));
        assert!(sql.contains("/ 1609.34"));
        assert!(sql.contains("LIMIT $5"));

        let sql = precipitation_counts_sql("ghcn");
        assert!(sql.contains("element = 'PRCP'"));
        assert!(sql.contains(">= $4::float8"));
    }

    #[test]
    fn test_element_and_count_decoding() {
        assert_eq!(parse_element("TMAX").unwrap(), Element::Tmax);
        assert!(matches!(parse_element("ZZZZ"), Err(WeatherError::MalformedResponse(_))));
        assert_eq!(non_negative(12, "total_observations").unwrap(), 12);
        assert!(non_negative(-1, "total_observations").is_err());
    }

    #[test]
    fn test_connect_requires_url() {
        let config = MirrorConfig { url: None, schema: "ghcn".to_string() };
        assert!(matches!(MirrorSource::connect(&config), Err(WeatherError::Config(_))));
    }
}
