pub mod abi_codec;
pub mod polygon_client;
pub mod purchase_parser;
pub mod range_scanner;
