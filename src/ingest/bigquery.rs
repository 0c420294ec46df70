/// BigQuery REST client for the GHCN-Daily public dataset.
///
/// Queries run through the synchronous `jobs.query` endpoint with standard
/// SQL and NAMED parameters. Every caller-supplied value (station id,
/// element codes, years, dates, thresholds) is bound as a typed parameter;
/// only the configured dataset name, the validated year of the nearest-station
/// table and the row limit are formatted into the SQL text.
///
/// API Documentation: https://cloud.google.com/bigquery/docs/reference/rest/v2/jobs/query
/// Dataset: https://console.cloud.google.com/marketplace/product/noaa-public/ghcn-d

use chrono::NaiveDate;
use reqwest::StatusCode;
use reqwest::blocking::{Client, Response};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{ExceedanceQuery, NearestStationQuery, ObservationQuery, ObservationSource};
use crate::config::BigQueryConfig;
use crate::logging::{self, DataSource};
use crate::model::{
    Element, ExceedanceCounts, Observation, StationObservation, WeatherError, WeatherResult,
};

// ============================================================================
// Request Structures
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryRequest<'a> {
    query: &'a str,
    use_legacy_sql: bool,
    parameter_mode: &'static str,
    query_parameters: Vec<QueryParameter>,
    timeout_ms: u64,
    max_results: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    location: Option<&'a str>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryParameter {
    name: String,
    parameter_type: ParameterType,
    parameter_value: ParameterValue,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct ParameterType {
    #[serde(rename = "type")]
    type_name: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    array_type: Option<Box<ParameterType>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct ParameterValue {
    #[serde(skip_serializing_if = "Option::is_none")]
    value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    array_values: Option<Vec<ParameterValue>>,
}

impl QueryParameter {
    fn scalar(name: &str, type_name: &'static str, value: String) -> Self {
        Self {
            name: name.to_string(),
            parameter_type: ParameterType { type_name, array_type: None },
            parameter_value: ParameterValue { value: Some(value), array_values: None },
        }
    }

    pub fn string(name: &str, value: &str) -> Self {
        Self::scalar(name, "STRING", value.to_string())
    }

    pub fn int64(name: &str, value: i64) -> Self {
        Self::scalar(name, "INT64", value.to_string())
    }

    pub fn float64(name: &str, value: f64) -> Self {
        Self::scalar(name, "FLOAT64", value.to_string())
    }

    pub fn date(name: &str, value: NaiveDate) -> Self {
        Self::scalar(name, "DATE", value.format("%Y-%m-%d").to_string())
    }

    pub fn string_array(name: &str, values: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            parameter_type: ParameterType {
                type_name: "ARRAY",
                array_type: Some(Box::new(ParameterType { type_name: "STRING", array_type: None })),
            },
            parameter_value: ParameterValue {
                value: None,
                array_values: Some(
                    values
                        .iter()
                        .map(|v| ParameterValue { value: Some(v.to_string()), array_values: None })
                        .collect(),
                ),
            },
        }
    }
}

// ============================================================================
// Response Structures
// ============================================================================

/// Shared shape of `jobs.query` and `jobs.getQueryResults` responses.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResponse {
    #[serde(default)]
    pub job_complete: bool,
    pub schema: Option<TableSchema>,
    #[serde(default)]
    pub rows: Vec<TableRow>,
    pub page_token: Option<String>,
    pub job_reference: Option<JobReference>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TableSchema {
    pub fields: Vec<FieldSchema>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FieldSchema {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: String,
}

/// One result row: cells in schema order.
#[derive(Debug, Deserialize)]
pub struct TableRow {
    pub f: Vec<TableCell>,
}

#[derive(Debug, Deserialize)]
pub struct TableCell {
    /// Scalars arrive as JSON strings, NULL as JSON null.
    pub v: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobReference {
    pub project_id: String,
    pub job_id: String,
    pub location: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

/// All rows of a completed query, across pages.
#[derive(Debug)]
pub struct QueryResult {
    pub schema: TableSchema,
    pub rows: Vec<TableRow>,
}

// ============================================================================
// SQL
// ============================================================================

pub fn observations_sql(dataset: &str, query: &ObservationQuery) -> String {
    let mut sql = format!(
        "SELECT t.id AS station_id, t.date, t.element, t.value
        FROM `{}.ghcnd_*` AS t
        WHERE t._TABLE_SUFFIX BETWEEN @start_year AND @end_year
          AND t.id = @station_id
          AND t.element IN UNNEST(@elements)",
        dataset
    );
    if query.start_date.is_some() {
        sql.push_str("\n          AND t.date >= @start_date");
    }
    if query.end_date.is_some() {
        sql.push_str("\n          AND t.date <= @end_date");
    }
    if query.min_raw_value.is_some() {
        sql.push_str("\n          AND t.value >= @min_value");
    }
    sql.push_str("\n        ORDER BY t.date DESC, t.element");
    sql
}

pub fn observations_params(query: &ObservationQuery) -> Vec<QueryParameter> {
    let codes = super::element_codes(&query.elements);
    let mut params = vec![
        QueryParameter::string("start_year", &query.start_year.to_string()),
        QueryParameter::string("end_year", &query.end_year.to_string()),
        QueryParameter::string("station_id", &query.station_id),
        QueryParameter::string_array("elements", &codes),
    ];
    if let Some(start) = query.start_date {
        params.push(QueryParameter::date("start_date", start));
    }
    if let Some(end) = query.end_date {
        params.push(QueryParameter::date("end_date", end));
    }
    if let Some(min) = query.min_raw_value {
        params.push(QueryParameter::int64("min_value", i64::from(min)));
    }
    params
}

pub fn nearest_station_sql(dataset: &str, query: &NearestStationQuery) -> String {
    format!(
        "WITH target AS (
          SELECT ST_GEOGPOINT(@longitude, @latitude) AS point
        ),
        closest AS (
          SELECT s.id AS station_id, s.name AS station_name,
                 ST_DISTANCE(t.point, ST_GEOGPOINT(s.longitude, s.latitude)) / 1609.34 AS distance_miles
          FROM `{dataset}.ghcnd_stations` AS s
          CROSS JOIN target AS t
          ORDER BY distance_miles
          LIMIT 1
        )
        SELECT c.station_id, c.station_name, d.date, d.element, d.value, c.distance_miles
        FROM closest AS c
        JOIN `{dataset}.ghcnd_{year}` AS d ON c.station_id = d.id
        WHERE d.element IN UNNEST(@elements)
        ORDER BY d.date DESC, d.element
        LIMIT {limit}",
        dataset = dataset,
        year = query.year,
        limit = query.limit
    )
}

pub fn nearest_station_params(query: &NearestStationQuery) -> Vec<QueryParameter> {
    let codes = super::element_codes(&query.elements);
    vec![
        QueryParameter::float64("latitude", query.latitude),
        QueryParameter::float64("longitude", query.longitude),
        QueryParameter::string_array("elements", &codes),
    ]
}

pub fn precipitation_counts_sql(dataset: &str) -> String {
    format!(
        "WITH rainfall AS (
          SELECT (t.value / 10.0) / 25.4 AS precip_inches
          FROM `{}.ghcnd_*` AS t
          WHERE t._TABLE_SUFFIX BETWEEN @start_year AND @end_year
            AND t.id = @station_id
            AND t.element = 'PRCP'
        )
        SELECT COUNTIF(precip_inches >= @threshold_inches) AS exceedance_count,
               COUNT(*) AS total_observations
        FROM rainfall",
        dataset
    )
}

pub fn precipitation_counts_params(query: &ExceedanceQuery) -> Vec<QueryParameter> {
    vec![
        QueryParameter::string("start_year", &query.start_year.to_string()),
        QueryParameter::string("end_year", &query.end_year.to_string()),
        QueryParameter::string("station_id", &query.station_id),
        QueryParameter::float64("threshold_inches", query.threshold.0),
    ]
}

// ============================================================================
// Response Parsing
// ============================================================================

pub fn parse_query_response(body: &str) -> WeatherResult<QueryResponse> {
    serde_json::from_str(body)
        .map_err(|e| WeatherError::MalformedResponse(format!("invalid BigQuery response: {}", e)))
}

/// Pull the `error.message` out of an error body, falling back to the raw text.
fn error_message(body: &str) -> String {
    serde_json::from_str::<ErrorEnvelope>(body)
        .map(|envelope| envelope.error.message)
        .unwrap_or_else(|_| body.chars().take(300).collect())
}

/// 429 and 5xx are worth retrying; other statuses are permanent.
pub fn is_transient_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

/// Column lookup by name over a result schema.
struct RowDecoder<'a> {
    fields: &'a [FieldSchema],
}

impl<'a> RowDecoder<'a> {
    fn new(schema: &'a TableSchema) -> Self {
        Self { fields: &schema.fields }
    }

    fn column(&self, name: &str) -> WeatherResult<usize> {
        self.fields
            .iter()
            .position(|f| f.name == name)
            .ok_or_else(|| WeatherError::MalformedResponse(format!("missing column '{}'", name)))
    }

    fn text<'r>(&self, row: &'r TableRow, index: usize) -> WeatherResult<&'r str> {
        let cell = row.f.get(index).ok_or_else(|| {
            WeatherError::MalformedResponse(format!("row has {} cells, expected > {}", row.f.len(), index))
        })?;
        cell.v.as_str().ok_or_else(|| {
            WeatherError::MalformedResponse(format!(
                "column '{}' is not a string value: {}",
                self.fields[index].name, cell.v
            ))
        })
    }

    fn parse<T>(&self, row: &TableRow, index: usize) -> WeatherResult<T>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        let raw = self.text(row, index)?;
        raw.parse::<T>().map_err(|e| {
            WeatherError::MalformedResponse(format!(
                "column '{}' value '{}': {}",
                self.fields[index].name, raw, e
            ))
        })
    }

    fn date(&self, row: &TableRow, index: usize) -> WeatherResult<NaiveDate> {
        let raw = self.text(row, index)?;
        NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|e| {
            WeatherError::MalformedResponse(format!("column 'date' value '{}': {}", raw, e))
        })
    }

    /// GHCN `value` is a FLOAT column holding whole tenths; accept "456" or "456.0".
    fn raw_value(&self, row: &TableRow, index: usize) -> WeatherResult<i32> {
        let value: f64 = self.parse(row, index)?;
        if !value.is_finite() || value.abs() > f64::from(i32::MAX) {
            return Err(WeatherError::MalformedResponse(format!(
                "column '{}' value {} is out of range",
                self.fields[index].name, value
            )));
        }
        Ok(value.round() as i32)
    }

    fn element(&self, row: &TableRow, index: usize) -> WeatherResult<Element> {
        let raw = self.text(row, index)?;
        raw.parse::<Element>().map_err(|_| {
            WeatherError::MalformedResponse(format!("unexpected element code '{}'", raw))
        })
    }
}

pub fn decode_observations(result: &QueryResult) -> WeatherResult<Vec<Observation>> {
    let decoder = RowDecoder::new(&result.schema);
    let (id, date, element, value) = (
        decoder.column("station_id")?,
        decoder.column("date")?,
        decoder.column("element")?,
        decoder.column("value")?,
    );

    result
        .rows
        .iter()
        .map(|row| {
            Ok(Observation {
                station_id: decoder.text(row, id)?.to_string(),
                date: decoder.date(row, date)?,
                element: decoder.element(row, element)?,
                raw_value: decoder.raw_value(row, value)?,
            })
        })
        .collect()
}

pub fn decode_station_observations(result: &QueryResult) -> WeatherResult<Vec<StationObservation>> {
    let decoder = RowDecoder::new(&result.schema);
    let (id, name, date, element, value, distance) = (
        decoder.column("station_id")?,
        decoder.column("station_name")?,
        decoder.column("date")?,
        decoder.column("element")?,
        decoder.column("value")?,
        decoder.column("distance_miles")?,
    );

    result
        .rows
        .iter()
        .map(|row| {
            Ok(StationObservation {
                station_id: decoder.text(row, id)?.to_string(),
                station_name: decoder.text(row, name)?.trim().to_string(),
                date: decoder.date(row, date)?,
                element: decoder.element(row, element)?,
                value: decoder.raw_value(row, value)?,
                distance_miles: decoder.parse(row, distance)?,
            })
        })
        .collect()
}

pub fn decode_counts(result: &QueryResult) -> WeatherResult<ExceedanceCounts> {
    let decoder = RowDecoder::new(&result.schema);
    let exceed = decoder.column("exceedance_count")?;
    let total = decoder.column("total_observations")?;

    match result.rows.first() {
        Some(row) => Ok(ExceedanceCounts {
            exceedance_count: decoder.parse(row, exceed)?,
            total_observations: decoder.parse(row, total)?,
        }),
        None => Ok(ExceedanceCounts::default()),
    }
}

// ============================================================================
// Client
// ============================================================================

pub struct BigQuerySource {
    client: Client,
    endpoint: String,
    project_id: String,
    dataset: String,
    location: Option<String>,
    access_token: String,
    timeout: Duration,
    max_results: u32,
}

/// Dataset names are formatted into SQL, so they are restricted to the
/// characters a `project.dataset` reference can contain.
pub fn validate_dataset(dataset: &str) -> WeatherResult<()> {
    let valid = !dataset.is_empty()
        && dataset.contains('.')
        && dataset
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(WeatherError::Config(format!(
            "bigquery.dataset '{}' must look like 'project.dataset'",
            dataset
        )))
    }
}

/// `jobs.getQueryResults` waits attempted on a job before giving up.
const MAX_JOB_POLLS: u32 = 5;

/// What to request after a `jobs.query`/`jobs.getQueryResults` response.
#[derive(Debug, PartialEq)]
enum NextFetch {
    /// Job still running: wait on it by id. The query is never resubmitted.
    Poll(JobReference),
    /// Job finished and more rows remain at the token.
    Page(JobReference, String),
    Done,
}

fn next_fetch(page: &QueryResponse) -> WeatherResult<NextFetch> {
    let job = || {
        page.job_reference.clone().ok_or_else(|| {
            WeatherError::MalformedResponse(if page.job_complete {
                "paged response without jobReference".to_string()
            } else {
                "incomplete query without jobReference".to_string()
            })
        })
    };
    if !page.job_complete {
        return Ok(NextFetch::Poll(job()?));
    }
    match &page.page_token {
        Some(token) => Ok(NextFetch::Page(job()?, token.clone())),
        None => Ok(NextFetch::Done),
    }
}

impl BigQuerySource {
    pub fn new(config: &BigQueryConfig) -> WeatherResult<Self> {
        validate_dataset(&config.dataset)?;
        let project_id = config
            .project_id
            .clone()
            .ok_or_else(|| WeatherError::Config("bigquery.project_id is required".to_string()))?;
        let access_token = config
            .access_token
            .clone()
            .ok_or_else(|| WeatherError::Config("BIGQUERY_ACCESS_TOKEN is not set".to_string()))?;
        let timeout = Duration::from_secs(config.timeout_secs);

        // HTTP timeout leaves headroom over the server-side query timeout
        let client = Client::builder()
            .timeout(timeout + Duration::from_secs(10))
            .build()
            .map_err(|e| WeatherError::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            project_id,
            dataset: config.dataset.clone(),
            location: config.location.clone(),
            access_token,
            timeout,
            max_results: config.max_results,
        })
    }

    fn unavailable(&self, context: &str, detail: String, transient: bool) -> WeatherError {
        WeatherError::DataSourceUnavailable {
            data_source: DataSource::BigQuery,
            context: context.to_string(),
            detail,
            transient,
        }
    }

    fn transport_error(&self, context: &str, err: reqwest::Error) -> WeatherError {
        let transient = err.is_timeout() || err.is_connect();
        self.unavailable(context, format!("request failed: {}", err), transient)
    }

    fn read_page(&self, response: Response, context: &str) -> WeatherResult<QueryResponse> {
        let status = response.status();
        let body = response.text().map_err(|e| self.transport_error(context, e))?;

        if !status.is_success() {
            return Err(self.unavailable(
                context,
                format!("HTTP {}: {}", status.as_u16(), error_message(&body)),
                is_transient_status(status),
            ));
        }

        parse_query_response(&body)
    }

    /// `jobs.getQueryResults` for a submitted job: waits up to the query
    /// timeout for completion, then returns the page at `page_token`.
    fn query_results(
        &self,
        job: &JobReference,
        page_token: Option<&str>,
        context: &str,
    ) -> WeatherResult<QueryResponse> {
        let url = format!("{}/projects/{}/queries/{}", self.endpoint, job.project_id, job.job_id);
        let mut request = self
            .client
            .get(&url)
            .bearer_auth(&self.access_token)
            .query(&[("timeoutMs", self.timeout.as_millis() as u64)])
            .query(&[("maxResults", self.max_results)]);
        if let Some(token) = page_token {
            request = request.query(&[("pageToken", token)]);
        }
        if let Some(location) = job.location.as_deref().or(self.location.as_deref()) {
            request = request.query(&[("location", location)]);
        }
        let response = request.send().map_err(|e| self.transport_error(context, e))?;
        self.read_page(response, context)
    }

    /// Run a query, wait on the job if it outlives the first request, and
    /// follow `pageToken` until every row is collected.
    ///
    /// The query is submitted once. Retrying a whole `execute` is left to
    /// the caller's retry policy.
    fn execute(&self, sql: &str, params: Vec<QueryParameter>, context: &str) -> WeatherResult<QueryResult> {
        let url = format!("{}/projects/{}/queries", self.endpoint, self.project_id);
        let request = QueryRequest {
            query: sql,
            use_legacy_sql: false,
            parameter_mode: "NAMED",
            query_parameters: params,
            timeout_ms: self.timeout.as_millis() as u64,
            max_results: self.max_results,
            location: self.location.as_deref(),
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.access_token)
            .json(&request)
            .send()
            .map_err(|e| self.transport_error(context, e))?;
        let mut page = self.read_page(response, context)?;

        let mut schema = None;
        let mut rows = Vec::new();
        let mut polls = 0;
        loop {
            if page.job_complete {
                if schema.is_none() {
                    schema = page.schema.take();
                }
                rows.append(&mut page.rows);
            }
            let (job, token) = match next_fetch(&page)? {
                NextFetch::Done => break,
                NextFetch::Poll(job) => {
                    polls += 1;
                    if polls > MAX_JOB_POLLS {
                        return Err(self.unavailable(
                            context,
                            format!(
                                "query job {} did not complete within {} s",
                                job.job_id,
                                self.timeout.as_secs() * u64::from(MAX_JOB_POLLS + 1)
                            ),
                            true,
                        ));
                    }
                    logging::debug(
                        DataSource::BigQuery,
                        None,
                        &format!("job {} still running; waiting (poll {})", job.job_id, polls),
                    );
                    (job, None)
                }
                NextFetch::Page(job, token) => {
                    logging::debug(
                        DataSource::BigQuery,
                        None,
                        &format!("fetching next page for job {} ({} row(s) so far)", job.job_id, rows.len()),
                    );
                    (job, Some(token))
                }
            };
            page = self.query_results(&job, token.as_deref(), context)?;
        }

        let schema = schema
            .ok_or_else(|| WeatherError::MalformedResponse("completed query without schema".to_string()))?;
        Ok(QueryResult { schema, rows })
    }
}

impl ObservationSource for BigQuerySource {
    fn data_source(&self) -> DataSource {
        DataSource::BigQuery
    }

    fn observations(&self, query: &ObservationQuery) -> WeatherResult<Vec<Observation>> {
        let sql = observations_sql(&self.dataset, query);
        let result = self.execute(&sql, observations_params(query), &query.describe())?;
        decode_observations(&result)
    }

    fn nearest_station_observations(
        &self,
        query: &NearestStationQuery,
    ) -> WeatherResult<Vec<StationObservation>> {
        let sql = nearest_station_sql(&self.dataset, query);
        let result = self.execute(&sql, nearest_station_params(query), &query.describe())?;
        decode_station_observations(&result)
    }

    fn precipitation_counts(&self, query: &ExceedanceQuery) -> WeatherResult<ExceedanceCounts> {
        let sql = precipitation_counts_sql(&self.dataset);
        let result = self.execute(&sql, precipitation_counts_params(query), &query.describe())?;
        decode_counts(&result)
    }
}

// ============================================================================
// Tests
// ============================================================================
