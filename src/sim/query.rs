//! History queries and the view handed to user callbacks.

use chrono::NaiveDateTime;
use indexmap::IndexMap;
use tracing::info;

use crate::error::{EngineError, Result};
use crate::sim::channel::{ChannelId, ChannelRef, ChannelRegistry};
use crate::sim::clock::TimestepTracker;
use crate::sim::exchange::DataExchange;
use crate::sim::reward::RewardLog;
use crate::sim::types::{CallingPoint, Category, Day, Descriptor, Reading, WeatherMetric};

/// Ordered channel name → selected readings.
pub type ChannelValues = IndexMap<String, Vec<Reading>>;

/// What to read: every channel of one category, or named channels.
#[derive(Debug, Clone, PartialEq)]
pub enum Query {
    Category(Category),
    Channels(Vec<ChannelRef>),
}

impl Query {
    /// Parses user tokens, where a lone category token (`"var"`, `"meter"`,
    /// ...) selects the whole category.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::CategoryQueryMix`] if a category token is
    /// combined with any other token.
    ///
    /// # Examples
    ///
    /// ```
    /// use ems_sync::sim::query::Query;
    /// use ems_sync::sim::types::Category;
    ///
    /// assert_eq!(Query::parse(&["meter"]).unwrap(), Query::Category(Category::Meter));
    /// assert!(Query::parse(&["meter", "zn0"]).is_err());
    /// ```
    pub fn parse<S: AsRef<str>>(tokens: &[S]) -> Result<Self> {
        let category = tokens
            .iter()
            .find_map(|t| Category::from_token(t.as_ref()));
        match category {
            Some(category) if tokens.len() == 1 => Ok(Query::Category(category)),
            Some(category) => Err(EngineError::CategoryQueryMix {
                category: category.token().to_string(),
            }),
            None => Ok(Query::Channels(
                tokens.iter().map(|t| ChannelRef::from(t.as_ref())).collect(),
            )),
        }
    }

    /// Query for named channels.
    pub fn names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Query::Channels(names.into_iter().map(|n| ChannelRef::Name(n.into())).collect())
    }

    fn resolve(&self, registry: &ChannelRegistry) -> Result<Vec<ChannelId>> {
        match self {
            Query::Category(category) => Ok(registry.of_category(*category).map(|(id, _)| id).collect()),
            Query::Channels(refs) => refs.iter().map(|r| registry.lookup(r)).collect(),
        }
    }
}

impl From<Category> for Query {
    fn from(category: Category) -> Self {
        Query::Category(category)
    }
}

/// Position in a channel's history counted back from the newest entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReverseIndex {
    /// `0` is the latest reading, `k` is `k` entries earlier.
    At(usize),
    /// Several positions, returned in the given order.
    Many(Vec<usize>),
    /// Entire history in append order.
    All,
}

impl Default for ReverseIndex {
    fn default() -> Self {
        ReverseIndex::At(0)
    }
}

/// Reads channel histories selected by `query` at `index`.
///
/// Positions past the start of a history are skipped with a note, so the
/// result may hold fewer values than requested.
///
/// # Errors
///
/// Returns [`EngineError::UnknownChannel`] for names that are not registered.
pub fn fetch(registry: &ChannelRegistry, query: &Query, index: &ReverseIndex) -> Result<ChannelValues> {
    let ids = query.resolve(registry)?;
    let mut out = ChannelValues::with_capacity(ids.len());
    for id in ids {
        let channel = registry.get(id);
        let history = channel.history();
        let len = history.len();
        let pick = |k: usize| -> Option<Reading> {
            if k < len {
                Some(history[len - 1 - k].value)
            } else {
                info!(
                    channel = channel.name(),
                    reverse_index = k,
                    available = len,
                    "not enough simulation time has elapsed for this reverse index"
                );
                None
            }
        };
        let values = match index {
            ReverseIndex::At(k) => pick(*k).into_iter().collect(),
            ReverseIndex::Many(ks) => ks.iter().filter_map(|k| pick(*k)).collect(),
            ReverseIndex::All => history.iter().map(|s| s.value).collect(),
        };
        out.insert(channel.name().to_string(), values);
    }
    Ok(out)
}

/// Hour and substep bounds checked before asking the simulator for a
/// forecast.
pub(crate) fn check_forecast_time(hour: u32, substep: u32, timesteps_per_hour: u32) -> Result<()> {
    if hour > 24 {
        return Err(EngineError::ForecastOutOfRange(format!(
            "hour {hour} outside 0..=24"
        )));
    }
    if substep == 0 || substep > timesteps_per_hour {
        return Err(EngineError::ForecastOutOfRange(format!(
            "substep {substep} outside 1..={timesteps_per_hour}"
        )));
    }
    Ok(())
}

/// View of the engine handed to observation and actuation callbacks.
///
/// Reads go through the registry snapshot of the current dispatch; the
/// simulator is reachable only for weather forecasts.
pub struct CallbackContext<'a> {
    registry: &'a ChannelRegistry,
    tracker: &'a TimestepTracker,
    rewards: &'a RewardLog,
    sim: &'a mut dyn DataExchange,
    timesteps_per_hour: u32,
    point: CallingPoint,
}

impl<'a> CallbackContext<'a> {
    pub(crate) fn new(
        registry: &'a ChannelRegistry,
        tracker: &'a TimestepTracker,
        rewards: &'a RewardLog,
        sim: &'a mut dyn DataExchange,
        timesteps_per_hour: u32,
        point: CallingPoint,
    ) -> Self {
        Self {
            registry,
            tracker,
            rewards,
            sim,
            timesteps_per_hour,
            point,
        }
    }

    /// Same as [`Engine::get`](crate::sim::engine::Engine::get).
    pub fn get(&self, query: impl Into<QueryArg>, index: ReverseIndex) -> Result<ChannelValues> {
        let query = query.into().into_query()?;
        fetch(self.registry, &query, &index)
    }

    /// Latest raw reading of one channel; `None` if it has no history yet
    /// or the reading was unset.
    pub fn latest(&self, name: &str) -> Result<Reading> {
        let id = self.registry.id(name)?;
        Ok(self.registry.get(id).latest().flatten())
    }

    /// Latest encoded reading of one channel.
    pub fn encoded(&self, name: &str) -> Result<Reading> {
        let id = self.registry.id(name)?;
        Ok(self.registry.get(id).encoded())
    }

    pub fn global_counter(&self) -> u64 {
        self.tracker.global_counter()
    }

    pub fn zone_substep(&self) -> u32 {
        self.tracker.zone_substep()
    }

    pub fn calendar(&self) -> Option<NaiveDateTime> {
        self.tracker.calendar()
    }

    pub fn calling_point(&self) -> CallingPoint {
        self.point
    }

    pub fn rewards(&self) -> &RewardLog {
        self.rewards
    }

    /// Weather forecast for registered weather channels at `hour` and
    /// `substep` of `day`.
    ///
    /// # Errors
    ///
    /// - [`EngineError::ForecastOutOfRange`] if `hour > 24` or `substep` is
    ///   not within `1..=timesteps_per_hour`.
    /// - [`EngineError::UnknownChannel`] if a name is not a weather channel.
    pub fn forecast(
        &mut self,
        names: &[&str],
        day: Day,
        hour: u32,
        substep: u32,
    ) -> Result<IndexMap<String, f64>> {
        check_forecast_time(hour, substep, self.timesteps_per_hour)?;

        let metrics = names
            .iter()
            .map(|name| match self.registry.by_name(name).map(|c| c.descriptor()) {
                Some(Descriptor::Weather(metric)) => Ok((name.to_string(), *metric)),
                _ => Err(EngineError::UnknownChannel(name.to_string())),
            })
            .collect::<Result<Vec<(String, WeatherMetric)>>>()?;

        Ok(metrics
            .into_iter()
            .map(|(name, metric)| {
                let value = match metric {
                    WeatherMetric::SunIsUp => f64::from(u8::from(self.sim.sun_is_up())),
                    m => self.sim.weather_at_time(m, day, hour, substep),
                };
                (name, value)
            })
            .collect())
    }
}

/// Accepted argument forms for `get`: a parsed [`Query`], a category, or
/// raw tokens.
#[derive(Debug, Clone)]
pub enum QueryArg {
    Query(Query),
    Tokens(Vec<String>),
}

impl QueryArg {
    pub(crate) fn into_query(self) -> Result<Query> {
        match self {
            QueryArg::Query(q) => Ok(q),
            QueryArg::Tokens(tokens) => Query::parse(&tokens),
        }
    }
}

impl From<Query> for QueryArg {
    fn from(q: Query) -> Self {
        QueryArg::Query(q)
    }
}

impl From<Category> for QueryArg {
    fn from(c: Category) -> Self {
        QueryArg::Query(Query::Category(c))
    }
}

impl From<&str> for QueryArg {
    fn from(token: &str) -> Self {
        QueryArg::Tokens(vec![token.to_string()])
    }
}

impl<const N: usize> From<[&str; N]> for QueryArg {
    fn from(tokens: [&str; N]) -> Self {
        QueryArg::Tokens(tokens.iter().map(|t| t.to_string()).collect())
    }
}

impl From<&[&str]> for QueryArg {
    fn from(tokens: &[&str]) -> Self {
        QueryArg::Tokens(tokens.iter().map(|t| t.to_string()).collect())
    }
}

impl From<Vec<String>> for QueryArg {
    fn from(tokens: Vec<String>) -> Self {
        QueryArg::Tokens(tokens)
    }
}
