pub mod hotshot_xl;
