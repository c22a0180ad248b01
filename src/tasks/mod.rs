pub mod adc_task;
pub mod flight_loop;
pub mod gps_task;
pub mod tick_task;
