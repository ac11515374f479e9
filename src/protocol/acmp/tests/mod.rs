mod engine;
mod message;
