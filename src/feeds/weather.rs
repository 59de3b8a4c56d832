use chrono::{NaiveDate, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::num;
use crate::error::FetchError;

const CACHE_MAX_AGE_MS: i64 = 3_600_000;
const CACHE_MAX_DRIFT_DEG: f64 = 0.01;

const CURRENT_FIELDS: &str = "temperature_2m,relative_humidity_2m,apparent_temperature,weather_code,wind_speed_10m,wind_direction_10m,surface_pressure";
const HOURLY_FIELDS: &str = "temperature_2m,weather_code,precipitation_probability";
const DAILY_FIELDS: &str = "weather_code,temperature_2m_max,temperature_2m_min,sunrise,sunset,uv_index_max,precipitation_probability_max,wind_speed_10m_max,relative_humidity_2m_mean";

/// Query for an Open-Meteo compatible forecast endpoint.
pub fn forecast_query(lat: f64, lon: f64) -> Vec<(&'static str, String)> {
    vec![
        ("latitude", lat.to_string()),
        ("longitude", lon.to_string()),
        ("current", CURRENT_FIELDS.to_string()),
        ("hourly", HOURLY_FIELDS.to_string()),
        ("daily", DAILY_FIELDS.to_string()),
        ("timezone", "auto".to_string()),
        ("forecast_days", "7".to_string()),
    ]
}

/// Short error tag for one failed base, `weather_http_<status>` for HTTP errors.
pub fn failure_tag(err: &FetchError) -> String {
    match err {
        FetchError::Status { code, .. } => format!("weather_http_{}", code),
        FetchError::Transport(_) => "weather_transport".to_string(),
        FetchError::Decode(_) => "weather_decode".to_string(),
    }
}

pub const ALL_SOURCES_FAILED: &str = "weather_all_sources_failed";

/// Icon and description for a WMO weather code.
pub fn describe(code: i64) -> (&'static str, &'static str) {
    match code {
        0 => ("☀", "Clear sky"),
        1 => ("🌤", "Mainly clear"),
        2 => ("⛅", "Partly cloudy"),
        3 => ("☁", "Overcast"),
        45 => ("🌫", "Foggy"),
        48 => ("🌫", "Depositing rime fog"),
        51 => ("🌧", "Light drizzle"),
        53 => ("🌧", "Moderate drizzle"),
        55 => ("🌧", "Dense drizzle"),
        56 => ("🌨", "Freezing drizzle"),
        57 => ("🌨", "Dense freezing drizzle"),
        61 => ("🌧", "Slight rain"),
        63 => ("🌧", "Moderate rain"),
        65 => ("🌧", "Heavy rain"),
        66 => ("🌨", "Freezing rain"),
        67 => ("🌨", "Heavy freezing rain"),
        71 => ("🌨", "Slight snow"),
        73 => ("🌨", "Moderate snow"),
        75 => ("❄", "Heavy snow"),
        77 => ("🌨", "Snow grains"),
        80 => ("🌦", "Slight showers"),
        81 => ("🌦", "Moderate showers"),
        82 => ("⛈", "Violent showers"),
        85 => ("🌨", "Slight snow showers"),
        86 => ("🌨", "Heavy snow showers"),
        95 => ("⛈", "Thunderstorm"),
        96 => ("⛈", "Thunderstorm with hail"),
        99 => ("⛈", "Thunderstorm with heavy hail"),
        _ => ("?", "Unknown"),
    }
}

/// 16-point compass direction.
pub fn wind_direction(deg: f64) -> &'static str {
    const DIRS: [&str; 16] = [
        "N", "NNE", "NE", "ENE", "E", "ESE", "SE", "SSE", "S", "SSW", "SW", "WSW", "W", "WNW", "NW",
        "NNW",
    ];
    let idx = (deg.rem_euclid(360.0) / 22.5).round() as usize % 16;
    DIRS[idx]
}

/// Rough visibility implied by the weather code.
pub fn visibility(code: i64) -> &'static str {
    if code <= 3 {
        "10+ km"
    } else if code <= 48 {
        "2-5 km"
    } else {
        "<2 km"
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Current {
    pub time: Option<NaiveDateTime>,
    pub temperature: f64,
    pub apparent: f64,
    pub humidity: f64,
    pub code: i64,
    pub wind_speed: f64,
    pub wind_direction: f64,
    pub pressure: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Hour {
    pub time: NaiveDateTime,
    pub temperature: f64,
    pub code: i64,
    pub precipitation: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Day {
    pub date: NaiveDate,
    pub code: i64,
    pub high: f64,
    pub low: f64,
    pub sunrise: Option<NaiveDateTime>,
    pub sunset: Option<NaiveDateTime>,
    pub uv: f64,
    pub rain: u32,
    pub wind: f64,
    pub humidity: Option<f64>,
}

impl Day {
    /// One-line outlook built from rain chance, wind and UV.
    pub fn summary(&self) -> String {
        let rain = if self.rain > 70 {
            "Heavy rain expected. ".to_string()
        } else if self.rain > 40 {
            "Possible rain showers. ".to_string()
        } else if self.rain > 10 {
            "Slight chance of rain. ".to_string()
        } else {
            "No rain expected. ".to_string()
        };
        let wind = self.wind.round();
        let wind = if wind > 40.0 {
            format!("Strong winds up to {:.0} km/h. ", wind)
        } else if wind > 20.0 {
            "Moderate winds. ".to_string()
        } else {
            "Light winds. ".to_string()
        };
        let uv = if self.uv > 7.0 {
            "Very high UV - protection essential."
        } else if self.uv > 5.0 {
            "High UV - use sun protection."
        } else if self.uv > 3.0 {
            "Moderate UV levels."
        } else {
            "Low UV levels."
        };
        format!("{}{}{}", rain, wind, uv)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Forecast {
    pub current: Current,
    pub hourly: Vec<Hour>,
    pub daily: Vec<Day>,
}

impl Forecast {
    /// Up to `count` hours starting at the current hour.
    pub fn upcoming_hours(&self, count: usize) -> &[Hour] {
        let start = self
            .current
            .time
            .and_then(|now| {
                let hour = now.with_minute(0)?.with_second(0)?;
                self.hourly.iter().position(|h| h.time >= hour)
            })
            .unwrap_or(0);
        let end = (start + count).min(self.hourly.len());
        &self.hourly[start..end]
    }

    pub fn today(&self) -> Option<&Day> {
        self.daily.first()
    }
}

fn time(v: &Value) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(v.as_str()?, "%Y-%m-%dT%H:%M").ok()
}

fn date(v: &Value) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(v.as_str()?, "%Y-%m-%d").ok()
}

fn percent(v: &Value) -> u32 {
    num(v).map(|p| p.clamp(0.0, 100.0) as u32).unwrap_or(0)
}

pub fn parse_forecast(value: &Value) -> Option<Forecast> {
    let cur = value.get("current")?;
    let current = Current {
        time: time(&cur["time"]),
        temperature: num(&cur["temperature_2m"])?,
        apparent: num(&cur["apparent_temperature"]).unwrap_or(f64::NAN),
        humidity: num(&cur["relative_humidity_2m"]).unwrap_or(f64::NAN),
        code: cur["weather_code"].as_i64().unwrap_or(-1),
        wind_speed: num(&cur["wind_speed_10m"]).unwrap_or(f64::NAN),
        wind_direction: num(&cur["wind_direction_10m"]).unwrap_or(0.0),
        pressure: num(&cur["surface_pressure"]).unwrap_or(f64::NAN),
    };

    let h = &value["hourly"];
    let hourly = h["time"]
        .as_array()
        .map(|times| {
            times
                .iter()
                .enumerate()
                .filter_map(|(i, t)| {
                    Some(Hour {
                        time: time(t)?,
                        temperature: num(&h["temperature_2m"][i])?,
                        code: h["weather_code"][i].as_i64().unwrap_or(-1),
                        precipitation: percent(&h["precipitation_probability"][i]),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    let d = &value["daily"];
    let daily = d["time"]
        .as_array()
        .map(|days| {
            days.iter()
                .enumerate()
                .filter_map(|(i, t)| {
                    Some(Day {
                        date: date(t)?,
                        code: d["weather_code"][i].as_i64().unwrap_or(-1),
                        high: num(&d["temperature_2m_max"][i])?,
                        low: num(&d["temperature_2m_min"][i])?,
                        sunrise: time(&d["sunrise"][i]),
                        sunset: time(&d["sunset"][i]),
                        uv: num(&d["uv_index_max"][i]).unwrap_or(0.0),
                        rain: percent(&d["precipitation_probability_max"][i]),
                        wind: num(&d["wind_speed_10m_max"][i]).unwrap_or(0.0),
                        humidity: num(&d["relative_humidity_2m_mean"][i]),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    Some(Forecast {
        current,
        hourly,
        daily,
    })
}

/// Last good reading, persisted so a restart can show something at once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeatherCache {
    pub cur_temp: i64,
    pub feels_temp: i64,
    pub icon: String,
    pub desc: String,
    pub humidity: i64,
    pub wind: i64,
    pub wind_dir: String,
    pub pressure: i64,
    pub lat: f64,
    pub lon: f64,
    /// Epoch milliseconds.
    pub ts: i64,
}

impl WeatherCache {
    pub fn from_current(current: &Current, lat: f64, lon: f64, now_ms: i64) -> Self {
        let (icon, desc) = describe(current.code);
        let round = |v: f64| if v.is_finite() { v.round() as i64 } else { 0 };
        Self {
            cur_temp: round(current.temperature),
            feels_temp: round(current.apparent),
            icon: icon.to_string(),
            desc: desc.to_string(),
            humidity: round(current.humidity),
            wind: round(current.wind_speed),
            wind_dir: wind_direction(current.wind_direction).to_string(),
            pressure: round(current.pressure),
            lat,
            lon,
            ts: now_ms,
        }
    }

    /// Under an hour old and taken at the configured location.
    pub fn is_usable(&self, now_ms: i64, lat: f64, lon: f64) -> bool {
        self.ts > 0
            && now_ms - self.ts < CACHE_MAX_AGE_MS
            && (self.lat - lat).abs() < CACHE_MAX_DRIFT_DEG
            && (self.lon - lon).abs() < CACHE_MAX_DRIFT_DEG
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Value {
        json!({
            "current": {
                "time": "2024-05-01T14:15",
                "temperature_2m": 12.6,
                "apparent_temperature": 10.2,
                "relative_humidity_2m": 81,
                "weather_code": 61,
                "wind_speed_10m": 23.4,
                "wind_direction_10m": 250,
                "surface_pressure": 1008.7
            },
            "hourly": {
                "time": ["2024-05-01T13:00", "2024-05-01T14:00", "2024-05-01T15:00"],
                "temperature_2m": [12.0, 12.5, 13.1],
                "weather_code": [3, 61, 61],
                "precipitation_probability": [10, 60, null]
            },
            "daily": {
                "time": ["2024-05-01", "2024-05-02"],
                "weather_code": [61, 0],
                "temperature_2m_max": [14.2, 18.0],
                "temperature_2m_min": [7.9, 6.1],
                "sunrise": ["2024-05-01T05:21", "2024-05-02T05:19"],
                "sunset": ["2024-05-01T20:58", "2024-05-02T21:00"],
                "uv_index_max": [3.5, 8.1],
                "precipitation_probability_max": [75, 5],
                "wind_speed_10m_max": [44.6, 12.0],
                "relative_humidity_2m_mean": [80, 60]
            }
        })
    }

    #[test]
    fn parses_all_three_blocks() {
        let f = parse_forecast(&sample()).unwrap();
        assert_eq!(f.current.code, 61);
        assert_eq!(f.hourly.len(), 3);
        assert_eq!(f.hourly[2].precipitation, 0);
        assert_eq!(f.daily.len(), 2);
        assert_eq!(f.today().unwrap().high, 14.2);
        assert_eq!(f.daily[1].date, NaiveDate::from_ymd_opt(2024, 5, 2).unwrap());
    }

    #[test]
    fn upcoming_hours_start_at_current_hour() {
        let f = parse_forecast(&sample()).unwrap();
        let hours = f.upcoming_hours(24);
        assert_eq!(hours.len(), 2);
        assert_eq!(hours[0].temperature, 12.5);
    }

    #[test]
    fn missing_current_block_is_rejected() {
        assert_eq!(parse_forecast(&json!({"daily": {}})), None);
    }

    #[test]
    fn summaries_follow_bands() {
        let f = parse_forecast(&sample()).unwrap();
        assert_eq!(
            f.daily[0].summary(),
            "Heavy rain expected. Strong winds up to 45 km/h. Moderate UV levels."
        );
        assert_eq!(
            f.daily[1].summary(),
            "No rain expected. Light winds. Very high UV - protection essential."
        );
    }

    #[test]
    fn compass_and_codes() {
        assert_eq!(wind_direction(0.0), "N");
        assert_eq!(wind_direction(250.0), "WSW");
        assert_eq!(wind_direction(359.0), "N");
        assert_eq!(wind_direction(-22.5), "NNW");
        assert_eq!(describe(95).1, "Thunderstorm");
        assert_eq!(describe(42).1, "Unknown");
        assert_eq!(visibility(45), "2-5 km");
    }

    #[test]
    fn cache_freshness_and_location() {
        let f = parse_forecast(&sample()).unwrap();
        let cache = WeatherCache::from_current(&f.current, 56.462, -2.9707, 1_000_000);
        assert_eq!(cache.cur_temp, 13);
        assert_eq!(cache.wind_dir, "WSW");
        assert!(cache.is_usable(1_000_000 + 3_599_999, 56.462, -2.9707));
        assert!(!cache.is_usable(1_000_000 + 3_600_000, 56.462, -2.9707));
        assert!(!cache.is_usable(1_000_001, 56.48, -2.9707));

        let v = serde_json::to_value(&cache).unwrap();
        assert!(v.get("curTemp").is_some());
        assert!(v.get("windDir").is_some());
    }

    #[test]
    fn failure_tags() {
        let err = FetchError::Status {
            code: 503,
            body: String::new(),
        };
        assert_eq!(failure_tag(&err), "weather_http_503");
    }
}
