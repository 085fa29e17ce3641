//! Mostrador Team - a supervisor that routes each message to one member agent

pub mod classifier;
pub mod registry;
pub mod team;

pub use classifier::{choose, keyword_match, parse_decision, signals_misroute, Decision, Route, RouteSource};
pub use registry::{TeamInfo, TeamRegistry};
pub use team::{member_session, previous_member, RoutingTeam, TeamOutcome, APOLOGY};
