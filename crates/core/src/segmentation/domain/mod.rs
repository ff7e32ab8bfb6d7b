pub mod background_remover;
