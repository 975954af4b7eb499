//! Calendar connectors
//!
//! - [`CalendarConnector`]: the contract each calendar provider implements
//! - [`Registry`]: provider name to connector lookup
//! - Google Calendar and Microsoft Graph implementations

pub mod google_calendar;
mod http;
pub mod microsoft_calendar;
pub mod registry;
pub mod trait_;

pub use google_calendar::{GoogleCalendarConnector, GoogleCalendarSettings};
pub use microsoft_calendar::{MicrosoftCalendarConnector, MicrosoftCalendarSettings};
pub use registry::{Registry, RegistryError};
pub use trait_::{
    CalendarConnector, CalendarEvent, CalendarInfo, ConnectorError, EventAttendee,
    MAX_EVENTS_PER_FETCH, TokenSet,
};
