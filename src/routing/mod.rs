//! Path pattern compilation, the route table and the router entry point.

pub mod pattern;
pub mod router;

pub use pattern::{PathPattern, PatternKind, WILDCARD_PARAM};
pub use router::{
    Dispatch, Handler, Route, RouteMatch, RouteTable, Router, RouterBuilder, ALL_METHODS,
};
