// Copyright (c) 2022-2023 Yuki Kishimoto
// Copyright (c) 2023-2024 Rust Nostr Developers
// Distributed under the MIT software license

//! Sub-relay routing.
//!
//! Grounded on `router.go`: an ordered list of routes, each pairing a
//! matcher closure with a sub-relay; the first match wins, falling back to
//! the router's own relay.

use std::sync::Arc;

use nostr::{Event, Filter};

use crate::relay::Relay;

type EventMatcher = Box<dyn Fn(&Event) -> bool + Send + Sync>;
type FilterMatcher = Box<dyn Fn(&Filter) -> bool + Send + Sync>;

/// One routing rule: if either matcher accepts, requests go to `relay`.
pub struct Route {
    event_matcher: Option<EventMatcher>,
    filter_matcher: Option<FilterMatcher>,
    relay: Arc<Relay>,
}

impl Route {
    fn matches_event(&self, event: &Event) -> bool {
        self.event_matcher.as_ref().is_some_and(|m| m(event))
    }

    fn matches_filter(&self, filter: &Filter) -> bool {
        self.filter_matcher.as_ref().is_some_and(|m| m(filter))
    }
}

/// Fluent builder for one [`Route`], mirroring khatru's `routeBuilder`.
pub struct RouteBuilder {
    event_matcher: Option<EventMatcher>,
    filter_matcher: Option<FilterMatcher>,
}

impl RouteBuilder {
    fn new() -> Self {
        Self {
            event_matcher: None,
            filter_matcher: None,
        }
    }

    /// Route events for which `matcher` returns `true`.
    pub fn matching_events(mut self, matcher: impl Fn(&Event) -> bool + Send + Sync + 'static) -> Self {
        self.event_matcher = Some(Box::new(matcher));
        self
    }

    /// Route filters for which `matcher` returns `true`.
    pub fn matching_filters(mut self, matcher: impl Fn(&Filter) -> bool + Send + Sync + 'static) -> Self {
        self.filter_matcher = Some(Box::new(matcher));
        self
    }

    /// Finish the route, sending matching traffic to `relay`.
    pub fn to_relay(self, relay: Arc<Relay>) -> Route {
        Route {
            event_matcher: self.event_matcher,
            filter_matcher: self.filter_matcher,
            relay,
        }
    }
}

/// A list of [`Route`]s consulted in order, falling back to a root relay.
#[derive(Default)]
pub struct Router {
    routes: Vec<Route>,
}

impl Router {
    /// An empty router (everything falls back to the root relay).
    pub fn new() -> Self {
        Self::default()
    }

    /// Start defining a new route.
    pub fn route() -> RouteBuilder {
        RouteBuilder::new()
    }

    /// Append a route, to be tried in registration order.
    pub fn add_route(&mut self, route: Route) {
        self.routes.push(route);
    }

    /// Select the sub-relay an incoming event should be processed by,
    /// falling back to `root` if no route matches.
    pub fn sub_relay_for_event<'a>(&'a self, root: &'a Arc<Relay>, event: &Event) -> &'a Arc<Relay> {
        self.routes
            .iter()
            .find(|r| r.matches_event(event))
            .map(|r| &r.relay)
            .unwrap_or(root)
    }

    /// Select the sub-relay a filter (REQ/COUNT) should be evaluated
    /// against, falling back to `root` if no route matches.
    pub fn sub_relay_for_filter<'a>(&'a self, root: &'a Arc<Relay>, filter: &Filter) -> &'a Arc<Relay> {
        self.routes
            .iter()
            .find(|r| r.matches_filter(filter))
            .map(|r| &r.relay)
            .unwrap_or(root)
    }

    /// Whether any routes are registered.
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// `root` plus every sub-relay reachable through a route, deduplicated
    /// by pointer identity. Used by connection teardown/`CLOSE` bookkeeping,
    /// which doesn't track which sub-relay a given subscription landed on.
    pub fn all_relays(&self, root: &Arc<Relay>) -> Vec<Arc<Relay>> {
        let mut relays: Vec<Arc<Relay>> = vec![Arc::clone(root)];
        for route in &self.routes {
            if !relays.iter().any(|r| Arc::ptr_eq(r, &route.relay)) {
                relays.push(Arc::clone(&route.relay));
            }
        }
        relays
    }
}
