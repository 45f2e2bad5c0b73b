pub mod expiry_reminder;

pub use expiry_reminder::ExpiryReminderWorker;
