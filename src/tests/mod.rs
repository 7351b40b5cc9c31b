// Test modules for the chat client
// Each module covers the corresponding source module

mod inbox_tests;
mod transport_tests;
