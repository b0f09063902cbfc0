//! Typed resource endpoints backed by the query cache.

mod chat;
mod leads;
mod telegram;
mod users;

pub use chat::ChatApi;
pub use leads::{LeadsApi, ImportFile};
pub use telegram::TelegramApi;
pub use users::UsersApi;

pub(crate) fn paging(page: u32, page_size: u32) -> [(&'static str, String); 2] {
    [("page", page.to_string()), ("page_size", page_size.to_string())]
}
