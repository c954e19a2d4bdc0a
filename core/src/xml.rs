//! XML request bodies for PROPFIND and REPORT.
//!
//! Every caller-supplied string embedded here goes through `escape_xml`.

use std::borrow::Cow;

pub const CALDAV_NS: &str = "urn:ietf:params:xml:ns:caldav";
pub const CARDDAV_NS: &str = "urn:ietf:params:xml:ns:carddav";

const XML_DECL: &str = r#"<?xml version="1.0" encoding="utf-8"?>"#;

/// A CalDAV time-range in `YYYYMMDDTHHMMSSZ` form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeRange {
    pub start: String,
    pub end: String,
}

/// Property filter for an addressbook-query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContactFilter {
    All,
    Name(String),
    Email(String),
}

pub fn escape_xml(input: &str) -> Cow<'_, str> {
    quick_xml::escape::escape(input)
}

pub fn calendar_discovery_body() -> String {
    format!(
        r#"{XML_DECL}
<D:propfind xmlns:D="DAV:" xmlns:C="{CALDAV_NS}">
  <D:prop>
    <D:resourcetype/>
    <D:displayname/>
    <C:calendar-description/>
    <C:supported-calendar-component-set/>
  </D:prop>
</D:propfind>"#
    )
}

pub fn address_book_discovery_body() -> String {
    format!(
        r#"{XML_DECL}
<D:propfind xmlns:D="DAV:" xmlns:C="{CARDDAV_NS}">
  <D:prop>
    <D:resourcetype/>
    <D:displayname/>
    <C:addressbook-description/>
    <C:supported-address-data/>
  </D:prop>
</D:propfind>"#
    )
}

/// calendar-query for VEVENT components, optionally bounded by `range`.
pub fn calendar_query_body(range: Option<&TimeRange>) -> String {
    let event_filter = match range {
        Some(range) => format!(
            r#"<C:comp-filter name="VEVENT">
        <C:time-range start="{}" end="{}"/>
      </C:comp-filter>"#,
            escape_xml(&range.start),
            escape_xml(&range.end)
        ),
        None => r#"<C:comp-filter name="VEVENT"/>"#.to_string(),
    };
    format!(
        r#"{XML_DECL}
<C:calendar-query xmlns:D="DAV:" xmlns:C="{CALDAV_NS}">
  <D:prop>
    <D:getetag/>
    <C:calendar-data/>
  </D:prop>
  <C:filter>
    <C:comp-filter name="VCALENDAR">
      {event_filter}
    </C:comp-filter>
  </C:filter>
</C:calendar-query>"#
    )
}

pub fn address_book_query_body(filter: &ContactFilter) -> String {
    let filter_xml = match filter {
        ContactFilter::All => "<C:filter/>".to_string(),
        ContactFilter::Name(term) => prop_filter("FN", term),
        ContactFilter::Email(term) => prop_filter("EMAIL", term),
    };
    format!(
        r#"{XML_DECL}
<C:addressbook-query xmlns:D="DAV:" xmlns:C="{CARDDAV_NS}">
  <D:prop>
    <D:getetag/>
    <C:address-data/>
  </D:prop>
  {filter_xml}
</C:addressbook-query>"#
    )
}

fn prop_filter(property: &str, term: &str) -> String {
    format!(
        r#"<C:filter>
    <C:prop-filter name="{property}">
      <C:text-match collation="i;unicode-casemap" match-type="contains">{}</C:text-match>
    </C:prop-filter>
  </C:filter>"#,
        escape_xml(term)
    )
}

pub fn resource_propfind_body() -> String {
    format!(
        r#"{XML_DECL}
<D:propfind xmlns:D="DAV:">
  <D:prop>
    <D:displayname/>
    <D:getetag/>
    <D:getcontenttype/>
    <D:getlastmodified/>
    <D:getcontentlength/>
    <D:resourcetype/>
  </D:prop>
</D:propfind>"#
    )
}
