//! Declarative route tables.
//!
//! Each remote operation is a row: HTTP verb, path template, media type, and the parser that
//! reads its response. Dispatching is left to the transport; a table only turns an operation
//! name plus parameters into a concrete request.
//!
//! Two shapes are supported. Query-style operations (`POST /` with an `Action` form field) are
//! used by the compute and load balancer services. Resource-style operations use `{param}` path
//! templates, as the configuration-management API does.

use crate::error::RouteError;
use http::header::{ACCEPT, CONTENT_TYPE};
use http::{Method, Request};
use std::collections::BTreeMap;
use std::fmt;
use url::form_urlencoded;
use url::Url;

pub const APPLICATION_JSON: &str = "application/json";
pub const TEXT_XML: &str = "text/xml";
pub const FORM_URLENCODED: &str = "application/x-www-form-urlencoded";

/// Compute query API version.
pub const COMPUTE_API_VERSION: &str = "2009-11-30";
/// Load balancer query API version.
pub const LOAD_BALANCER_API_VERSION: &str = "2009-05-15";

/// How a route's response body is read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResponseParser {
    RegionEndpoints,
    AvailabilityZones,
    Instances,
    InstanceStateChanges,
    Images,
    KeyPairs,
    KeyPair,
    SecurityGroups,
    Addresses,
    PublicIp,
    Volumes,
    LoadBalancers,
    LoadBalancerDns,
    /// `{"private_key": ...}` from a create call.
    KeyFromJson,
    UserFromJson,
    OrganizationFromJson,
    /// Success carries no body worth reading.
    Empty,
}

/// What a 404 means for this route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OnNotFound {
    /// Surface [`crate::ProviderError::NotFound`].
    #[default]
    Fail,
    /// Treat as "absent" and return no value.
    ReturnNone,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Style {
    Query { action: &'static str, version: &'static str },
    Resource,
}

/// One remote operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    name: &'static str,
    method: Method,
    path: &'static str,
    style: Style,
    consumes: &'static str,
    response: ResponseParser,
    on_not_found: OnNotFound,
}

impl Route {
    /// `POST /` with `Action` and `Version` form fields.
    pub fn query(action: &'static str, version: &'static str, response: ResponseParser) -> Self {
        Self {
            name: action,
            method: Method::POST,
            path: "/",
            style: Style::Query { action, version },
            consumes: TEXT_XML,
            response,
            on_not_found: OnNotFound::Fail,
        }
    }

    /// A `{param}`-templated JSON resource operation.
    pub fn resource(
        name: &'static str,
        method: Method,
        path: &'static str,
        response: ResponseParser,
    ) -> Self {
        Self {
            name,
            method,
            path,
            style: Style::Resource,
            consumes: APPLICATION_JSON,
            response,
            on_not_found: OnNotFound::Fail,
        }
    }

    pub fn on_not_found(mut self, behavior: OnNotFound) -> Self {
        self.on_not_found = behavior;
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &'static str {
        self.path
    }

    pub fn consumes(&self) -> &'static str {
        self.consumes
    }

    pub fn response(&self) -> ResponseParser {
        self.response
    }

    pub fn not_found_behavior(&self) -> OnNotFound {
        self.on_not_found
    }

    /// `Action` value for query-style routes.
    pub fn action(&self) -> Option<&'static str> {
        match self.style {
            Style::Query { action, .. } => Some(action),
            Style::Resource => None,
        }
    }

    /// Parameter names the path template needs, in order.
    pub fn template_params(&self) -> Result<Vec<&'static str>, RouteError> {
        segments(self.name, self.path)?
            .into_iter()
            .filter_map(|segment| match segment {
                Segment::Param(name) => Some(Ok(name)),
                Segment::Literal(_) => None,
            })
            .collect()
    }

    /// Fill the template from `params`; parameters the path does not use are carried along
    /// as form fields (query routes) or query string pairs (resource routes).
    pub fn expand(&self, params: &[(&str, &str)]) -> Result<ExpandedRoute, RouteError> {
        let mut used = vec![false; params.len()];
        let mut path = Vec::new();
        for segment in segments(self.name, self.path)? {
            match segment {
                Segment::Literal(text) => path.push(text.to_string()),
                Segment::Param(name) => {
                    let index = params.iter().position(|(key, _)| *key == name).ok_or_else(|| {
                        RouteError::MissingParameter { route: self.name.to_string(), param: name.to_string() }
                    })?;
                    used[index] = true;
                    path.push(params[index].1.to_string());
                }
            }
        }

        let mut extra = Vec::new();
        if let Style::Query { action, version } = self.style {
            extra.push(("Action".to_string(), action.to_string()));
            extra.push(("Version".to_string(), version.to_string()));
        }
        extra.extend(
            params
                .iter()
                .zip(used)
                .filter(|(_, used)| !used)
                .map(|((k, v), _)| (k.to_string(), v.to_string())),
        );

        Ok(ExpandedRoute {
            name: self.name,
            method: self.method.clone(),
            segments: path,
            params: extra,
            form: matches!(self.style, Style::Query { .. }),
            consumes: self.consumes,
        })
    }
}

enum Segment {
    Literal(&'static str),
    Param(&'static str),
}

fn segments(route: &str, template: &'static str) -> Result<Vec<Segment>, RouteError> {
    let malformed = || RouteError::MalformedTemplate { route: route.to_string(), template: template.to_string() };
    let Some(rest) = template.strip_prefix('/') else {
        return Err(malformed());
    };
    rest.split('/')
        .filter(|segment| !segment.is_empty())
        .map(|segment| {
            match segment.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
                Some(name) if !name.is_empty() && !name.contains(['{', '}']) => Ok(Segment::Param(name)),
                Some(_) => Err(malformed()),
                None if segment.contains(['{', '}']) => Err(malformed()),
                None => Ok(Segment::Literal(segment)),
            }
        })
        .collect()
}

/// A route with its parameters bound.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpandedRoute {
    name: &'static str,
    method: Method,
    segments: Vec<String>,
    params: Vec<(String, String)>,
    form: bool,
    consumes: &'static str,
}

impl ExpandedRoute {
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Unencoded path, e.g. `/users/alice`.
    pub fn path(&self) -> String {
        format!("/{}", self.segments.join("/"))
    }

    /// Form fields (query routes) or query string pairs (resource routes).
    pub fn params(&self) -> &[(String, String)] {
        &self.params
    }

    /// Build the request against `base`, appending the path to the base's own path.
    ///
    /// Query routes carry their parameters as a form body; resource routes carry `body` as
    /// given and their leftover parameters in the query string.
    pub fn to_request(&self, base: &Url, body: Option<String>) -> Result<Request<String>, RouteError> {
        let invalid = |reason: String| RouteError::InvalidRequest { route: self.name.to_string(), reason };
        let mut url = base.clone();
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|()| invalid(format!("{base} cannot carry a path")))?;
            path.pop_if_empty();
            path.extend(&self.segments);
        }
        if self.segments.is_empty() && !url.path().ends_with('/') {
            url.set_path(&format!("{}/", url.path()));
        }

        let (body, content_type) = if self.form {
            let encoded = form_urlencoded::Serializer::new(String::new())
                .extend_pairs(&self.params)
                .finish();
            (encoded, Some(FORM_URLENCODED))
        } else {
            if !self.params.is_empty() {
                url.query_pairs_mut().extend_pairs(&self.params);
            }
            let content_type = body.as_ref().map(|_| APPLICATION_JSON);
            (body.unwrap_or_default(), content_type)
        };

        let mut builder = Request::builder()
            .method(self.method.clone())
            .uri(url.as_str())
            .header(ACCEPT, self.consumes);
        if let Some(content_type) = content_type {
            builder = builder.header(CONTENT_TYPE, content_type);
        }
        builder.body(body).map_err(|e| invalid(e.to_string()))
    }
}

impl fmt::Display for ExpandedRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.path())
    }
}

/// Routes for one service, keyed by operation name.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: BTreeMap<&'static str, Route>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a route, replacing any route with the same name.
    pub fn with(mut self, route: Route) -> Self {
        self.routes.insert(route.name, route);
        self
    }

    pub fn get(&self, name: &str) -> Result<&Route, RouteError> {
        self.routes.get(name).ok_or_else(|| RouteError::UnknownRoute(name.to_string()))
    }

    pub fn expand(&self, name: &str, params: &[(&str, &str)]) -> Result<ExpandedRoute, RouteError> {
        self.get(name)?.expand(params)
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.routes.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

/// Compute query operations, including the region and zone discovery calls.
pub fn compute_query_routes() -> RouteTable {
    use ResponseParser::*;
    let v = COMPUTE_API_VERSION;
    [
        ("DescribeRegions", RegionEndpoints),
        ("DescribeAvailabilityZones", AvailabilityZones),
        ("DescribeInstances", Instances),
        ("RunInstances", Instances),
        ("TerminateInstances", InstanceStateChanges),
        ("StartInstances", InstanceStateChanges),
        ("StopInstances", InstanceStateChanges),
        ("DescribeImages", Images),
        ("DescribeKeyPairs", KeyPairs),
        ("CreateKeyPair", KeyPair),
        ("DeleteKeyPair", Empty),
        ("DescribeSecurityGroups", SecurityGroups),
        ("CreateSecurityGroup", Empty),
        ("DeleteSecurityGroup", Empty),
        ("AuthorizeSecurityGroupIngress", Empty),
        ("DescribeAddresses", Addresses),
        ("AllocateAddress", PublicIp),
        ("AssociateAddress", Empty),
        ("ReleaseAddress", Empty),
        ("DescribeVolumes", Volumes),
    ]
    .into_iter()
    .fold(RouteTable::new(), |table, (action, parser)| table.with(Route::query(action, v, parser)))
}

/// Load balancer query operations.
pub fn load_balancer_routes() -> RouteTable {
    use ResponseParser::*;
    let v = LOAD_BALANCER_API_VERSION;
    RouteTable::new()
        .with(Route::query("CreateLoadBalancer", v, LoadBalancerDns))
        .with(Route::query("DeleteLoadBalancer", v, Empty))
        .with(Route::query("DescribeLoadBalancers", v, LoadBalancers))
        .with(Route::query("RegisterInstancesWithLoadBalancer", v, Empty))
        .with(Route::query("DeregisterInstancesFromLoadBalancer", v, Empty))
}

/// Configuration-management API: users and organizations over JSON.
pub fn chef_routes() -> RouteTable {
    use ResponseParser::*;
    RouteTable::new()
        .with(Route::resource("create_user", Method::POST, "/users", KeyFromJson))
        .with(Route::resource("update_user", Method::PUT, "/users/{username}", UserFromJson))
        .with(
            Route::resource("get_user", Method::GET, "/users/{username}", UserFromJson)
                .on_not_found(OnNotFound::ReturnNone),
        )
        .with(Route::resource("delete_user", Method::DELETE, "/users/{username}", UserFromJson))
        .with(Route::resource("create_organization", Method::POST, "/organizations", KeyFromJson))
        .with(Route::resource(
            "update_organization",
            Method::PUT,
            "/organizations/{orgname}",
            OrganizationFromJson,
        ))
        .with(
            Route::resource("get_organization", Method::GET, "/organizations/{orgname}", OrganizationFromJson)
                .on_not_found(OnNotFound::ReturnNone),
        )
        .with(Route::resource(
            "delete_organization",
            Method::DELETE,
            "/organizations/{orgname}",
            OrganizationFromJson,
        ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_route_posts_action_and_version() {
        let route = compute_query_routes().expand("DescribeRegions", &[]).unwrap();
        assert_eq!(route.method(), Method::POST);
        assert_eq!(route.path(), "/");

        let request = route.to_request(&Url::parse("https://ec2.us-east-1.amazonaws.com").unwrap(), None).unwrap();
        assert_eq!(request.uri(), "https://ec2.us-east-1.amazonaws.com/");
        assert_eq!(request.body(), "Action=DescribeRegions&Version=2009-11-30");
        assert_eq!(request.headers()[CONTENT_TYPE], FORM_URLENCODED);
    }

    #[test]
    fn query_route_carries_extra_params_in_form() {
        let route = compute_query_routes()
            .expand("DescribeAvailabilityZones", &[("ZoneName.1", "us-east-1a")])
            .unwrap();
        let request = route.to_request(&Url::parse("https://ec2.x").unwrap(), None).unwrap();
        assert_eq!(
            request.body(),
            "Action=DescribeAvailabilityZones&Version=2009-11-30&ZoneName.1=us-east-1a"
        );
    }

    #[test]
    fn resource_route_fills_template() {
        let table = chef_routes();
        let route = table.expand("get_user", &[("username", "alice")]).unwrap();
        assert_eq!(route.to_string(), "GET /users/alice");
        assert_eq!(table.get("get_user").unwrap().not_found_behavior(), OnNotFound::ReturnNone);
        assert_eq!(table.get("delete_user").unwrap().not_found_behavior(), OnNotFound::Fail);
    }

    #[test]
    fn resource_request_encodes_segments_and_keeps_base_path() {
        let route = chef_routes().expand("update_user", &[("username", "alice smith")]).unwrap();
        let base = Url::parse("https://api.example.com/v1").unwrap();
        let request = route.to_request(&base, Some("{\"name\":\"alice\"}".to_string())).unwrap();
        assert_eq!(request.method(), Method::PUT);
        assert_eq!(request.uri(), "https://api.example.com/v1/users/alice%20smith");
        assert_eq!(request.headers()[CONTENT_TYPE], APPLICATION_JSON);
        assert_eq!(request.headers()[ACCEPT], APPLICATION_JSON);
    }

    #[test]
    fn missing_parameter_is_an_error() {
        let err = chef_routes().expand("get_organization", &[]).unwrap_err();
        assert_eq!(
            err,
            RouteError::MissingParameter { route: "get_organization".into(), param: "orgname".into() }
        );
    }

    #[test]
    fn unknown_route_is_an_error() {
        assert_eq!(
            compute_query_routes().get("DescribeUnicorns").unwrap_err(),
            RouteError::UnknownRoute("DescribeUnicorns".into())
        );
    }

    #[test]
    fn malformed_template_is_rejected() {
        let route = Route::resource("broken", Method::GET, "/users/{username", ResponseParser::Empty);
        assert!(matches!(route.template_params(), Err(RouteError::MalformedTemplate { .. })));
        assert_eq!(
            chef_routes().get("get_user").unwrap().template_params().unwrap(),
            vec!["username"]
        );
    }

    #[test]
    fn tables_cover_discovery_operations() {
        let compute = compute_query_routes();
        for action in ["DescribeRegions", "DescribeAvailabilityZones", "DescribeInstances"] {
            assert_eq!(compute.get(action).unwrap().action(), Some(action));
        }
        assert_eq!(load_balancer_routes().len(), 5);
        assert_eq!(chef_routes().len(), 8);
    }
}
