//! ShopMind HTTP service library (router, handlers and shared state).

pub mod gateway;
