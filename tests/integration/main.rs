//! Integration tests: the full watch → queue → process → file cycle
//! against an in-memory brokerage page.

mod lifecycle;
