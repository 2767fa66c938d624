mod mock;
mod notifications;
