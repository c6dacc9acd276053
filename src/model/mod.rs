pub mod asignacion_recurrente;
pub mod personal;
pub mod personal_residencia;
pub mod registro_asistencia;
