pub mod async_task;

pub mod net;

pub mod time;

#[cfg(test)]
mod time_test;
