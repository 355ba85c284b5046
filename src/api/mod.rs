pub mod debug;
pub mod health;
pub mod keywords;
pub mod oauth;
pub mod reports;
pub mod slack;

use actix_web::web;
use serde::Deserialize;

const DEFAULT_PAGE_SIZE: i64 = 20;
const MAX_PAGE_SIZE: i64 = 100;

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(health::index)
        .service(health::health)
        .service(health::ready)
        .service(health::metrics)
        .service(slack::events)
        .service(slack::commands)
        .service(slack::interactions)
        .service(oauth::google_authorize)
        .service(oauth::google_callback)
        .service(oauth::gsc_authorize)
        .service(oauth::gsc_callback)
        .service(oauth::slack_install)
        .service(oauth::slack_callback)
        .service(reports::generate)
        .service(reports::list)
        .service(reports::get)
        .service(keywords::list)
        .service(keywords::get)
        .service(keywords::approve)
        .service(keywords::reject)
        .service(debug::check_state);
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct Pagination {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl Pagination {
    /// `(limit, offset)` with the limit clamped to `1..=100`.
    pub fn resolve(&self) -> (i64, i64) {
        let limit = self
            .limit
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .clamp(1, MAX_PAGE_SIZE);
        let offset = self.offset.unwrap_or(0).max(0);
        (limit, offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pagination_defaults_and_clamps() {
        assert_eq!(Pagination::default().resolve(), (20, 0));

        let page = Pagination {
            limit: Some(500),
            offset: Some(-3),
        };
        assert_eq!(page.resolve(), (100, 0));

        let page = Pagination {
            limit: Some(0),
            offset: Some(40),
        };
        assert_eq!(page.resolve(), (1, 40));
    }
}
