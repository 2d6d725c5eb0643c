//! Request URI decomposition for frame-source routing.
//!
//! `/filesystem/corridor?ext=jpg` becomes path segments
//! `["filesystem", "corridor"]` and parameters `[("ext", "jpg")]`. The first
//! segment selects the source factory; the rest are handed to it.

#[derive(Debug, Default, PartialEq, Eq)]
pub struct RequestQuery {
    pub path: Vec<String>,
    pub parameters: Vec<(String, String)>,
}

impl RequestQuery {
    pub fn parse(path: &str, query: &str) -> Self {
        let path = path
            .split('/')
            .filter(|segment| !segment.is_empty())
            .map(str::to_string)
            .collect();

        let parameters = query
            .split('&')
            .filter(|pair| !pair.is_empty())
            .filter_map(|pair| {
                pair.split_once('=')
                    .map(|(key, value)| (key.to_string(), value.to_string()))
            })
            .collect();

        Self { path, parameters }
    }
}
